//! Database metadata types for sqlcmdr.
//!
//! Represents the catalog graph returned by the metadata builder: tables,
//! views, stored routines with their parameters and output shape, and
//! foreign-key column pairs.

use super::type_format::display_type;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Represents the complete catalog of a database.
///
/// Each sequence is ordered by schema, then object name, then ordinal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMetadata {
    pub tables: Vec<TableMetadata>,
    pub views: Vec<ViewMetadata>,
    pub stored_procedures: Vec<StoredProcedureMetadata>,
    pub foreign_keys: Vec<ForeignKeyMetadata>,
}

impl DatabaseMetadata {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of tables, views and routines.
    pub fn object_count(&self) -> usize {
        self.tables.len() + self.views.len() + self.stored_procedures.len()
    }

    /// One-line summary used by the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} tables, {} views, {} routines, {} foreign key columns",
            self.tables.len(),
            self.views.len(),
            self.stored_procedures.len(),
            self.foreign_keys.len()
        )
    }
}

/// Formats the `[schema].[name]` display form shared by all schema objects.
pub fn full_name(schema: &str, name: &str) -> String {
    format!("[{schema}].[{name}]")
}

/// Quotes a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Represents a base table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableMetadata {
    pub schema: String,
    pub name: String,

    /// Columns in physical ordinal order.
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Creates a new table with no columns.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn full_name(&self) -> String {
        full_name(&self.schema, &self.name)
    }
}

impl Serialize for TableMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TableMetadata", 4)?;
        state.serialize_field("schema", &self.schema)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("fullName", &self.full_name())?;
        state.serialize_field("columns", &self.columns)?;
        state.end()
    }
}

/// Represents a view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewMetadata {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl ViewMetadata {
    /// Creates a new view with no columns.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn full_name(&self) -> String {
        full_name(&self.schema, &self.name)
    }
}

impl Serialize for ViewMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ViewMetadata", 4)?;
        state.serialize_field("schema", &self.schema)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("fullName", &self.full_name())?;
        state.serialize_field("columns", &self.columns)?;
        state.end()
    }
}

/// Whether a routine is a procedure (`CALL`) or a function (`SELECT`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum RoutineKind {
    #[default]
    Procedure,
    Function,
}

impl RoutineKind {
    /// Parses `information_schema.routines.routine_type`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PROCEDURE" => Some(Self::Procedure),
            "FUNCTION" => Some(Self::Function),
            _ => None,
        }
    }
}

/// Represents a stored routine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredProcedureMetadata {
    pub schema: String,
    pub name: String,
    pub kind: RoutineKind,
    pub parameters: Vec<ParameterMetadata>,

    /// Shape of the first result, when it could be described. Empty does not
    /// mean the routine returns nothing.
    pub output_columns: Vec<ColumnMetadata>,

    pub definition: Option<String>,
}

impl StoredProcedureMetadata {
    /// Creates a new routine with no parameters.
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: RoutineKind) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            kind,
            parameters: Vec::new(),
            output_columns: Vec::new(),
            definition: None,
        }
    }

    /// Sets the routine body.
    pub fn with_definition(self, definition: Option<String>) -> Self {
        Self { definition, ..self }
    }

    pub fn full_name(&self) -> String {
        full_name(&self.schema, &self.name)
    }

    /// The schema-qualified, quoted identifier usable in SQL.
    pub fn quoted_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    /// Statement whose first result describes the routine's output shape.
    pub fn describe_sql(&self) -> String {
        match self.kind {
            RoutineKind::Procedure => format!("CALL {}()", self.quoted_name()),
            RoutineKind::Function => format!("SELECT * FROM {}()", self.quoted_name()),
        }
    }
}

impl Serialize for StoredProcedureMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StoredProcedureMetadata", 7)?;
        state.serialize_field("schema", &self.schema)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("fullName", &self.full_name())?;
        state.serialize_field("kind", &self.kind)?;
        state.serialize_field("parameters", &self.parameters)?;
        state.serialize_field("outputColumns", &self.output_columns)?;
        state.serialize_field("definition", &self.definition)?;
        state.end()
    }
}

/// Represents a column of a table, view or routine result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
}

impl ColumnMetadata {
    /// Creates a new nullable column with the given name and data type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            max_length: None,
            precision: None,
            scale: None,
        }
    }

    /// Sets whether the column is nullable.
    pub fn nullable(self, nullable: bool) -> Self {
        Self {
            is_nullable: nullable,
            ..self
        }
    }

    /// Sets the character length.
    pub fn with_length(self, max_length: Option<i32>) -> Self {
        Self { max_length, ..self }
    }

    /// Sets numeric precision and scale.
    pub fn with_precision(self, precision: Option<i32>, scale: Option<i32>) -> Self {
        Self {
            precision,
            scale,
            ..self
        }
    }

    pub fn display_type(&self) -> String {
        display_type(&self.data_type, self.max_length, self.precision, self.scale)
    }
}

impl Serialize for ColumnMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ColumnMetadata", 7)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("dataType", &self.data_type)?;
        state.serialize_field("isNullable", &self.is_nullable)?;
        state.serialize_field("maxLength", &self.max_length)?;
        state.serialize_field("precision", &self.precision)?;
        state.serialize_field("scale", &self.scale)?;
        state.serialize_field("displayType", &self.display_type())?;
        state.end()
    }
}

/// Parameter direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
}

impl ParameterDirection {
    /// Parses `information_schema.parameters.parameter_mode`.
    ///
    /// `INOUT` parameters are reported as output.
    pub fn from_mode(mode: &str) -> Self {
        match mode.to_uppercase().as_str() {
            "OUT" | "INOUT" => Self::Output,
            _ => Self::Input,
        }
    }
}

/// Represents a routine parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMetadata {
    pub name: String,
    pub data_type: String,
    pub direction: ParameterDirection,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
}

impl ParameterMetadata {
    /// Creates a new parameter.
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        direction: ParameterDirection,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            direction,
            max_length: None,
            precision: None,
            scale: None,
        }
    }

    /// Sets the character length.
    pub fn with_length(self, max_length: Option<i32>) -> Self {
        Self { max_length, ..self }
    }

    /// Sets numeric precision and scale.
    pub fn with_precision(self, precision: Option<i32>, scale: Option<i32>) -> Self {
        Self {
            precision,
            scale,
            ..self
        }
    }

    pub fn display_type(&self) -> String {
        display_type(&self.data_type, self.max_length, self.precision, self.scale)
    }
}

impl Serialize for ParameterMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ParameterMetadata", 7)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("dataType", &self.data_type)?;
        state.serialize_field("direction", &self.direction)?;
        state.serialize_field("maxLength", &self.max_length)?;
        state.serialize_field("precision", &self.precision)?;
        state.serialize_field("scale", &self.scale)?;
        state.serialize_field("displayType", &self.display_type())?;
        state.end()
    }
}

/// One column pair of a foreign key. Multi-column keys produce one entry per
/// pair, all sharing `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyMetadata {
    pub name: String,
    pub parent_schema: String,
    pub parent_table: String,
    pub parent_column: String,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_column: String,
}
