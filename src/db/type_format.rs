//! Display formatting for column and parameter types.

/// Length value the catalog reports for unbounded character types.
pub const UNBOUNDED_LENGTH: i32 = -1;

const CHARACTER_TYPES: &[&str] = &["varchar", "char", "nvarchar", "nchar"];
const DECIMAL_TYPES: &[&str] = &["decimal", "numeric"];

/// Renders a type with its length or precision, e.g. `varchar(50)` or
/// `decimal(10,2)`.
///
/// Character types with a length of zero or a negative length other than
/// [`UNBOUNDED_LENGTH`] render as the bare type name.
pub fn display_type(
    data_type: &str,
    max_length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> String {
    let base = data_type.to_lowercase();

    if CHARACTER_TYPES.contains(&base.as_str()) {
        match max_length {
            Some(UNBOUNDED_LENGTH) => return format!("{data_type}(max)"),
            Some(length) if length > 0 => return format!("{data_type}({length})"),
            _ => {}
        }
    }

    if DECIMAL_TYPES.contains(&base.as_str()) {
        if let Some(precision) = precision {
            return format!("{data_type}({precision},{})", scale.unwrap_or(0));
        }
    }

    data_type.to_string()
}
