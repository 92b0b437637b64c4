use crate::domain::FundCode;
use polars::prelude::*;

/// Expected schema of the holdings store.
pub struct HoldingSchema;

impl HoldingSchema {
    /// Get the canonical holdings schema
    pub fn schema() -> Schema {
        Schema::from_iter(vec![
            Field::new("date".into(), DataType::Date),
            Field::new("fund".into(), DataType::String),
            Field::new("ticker".into(), DataType::String),
            Field::new("name".into(), DataType::String),
            Field::new("shares".into(), DataType::Float64),
            Field::new("market_value".into(), DataType::Float64),
            Field::new("weight".into(), DataType::Float64),
        ])
    }

    /// Add a `fund` column to files written before funds were tracked.
    ///
    /// Returns whether the column was filled in.
    pub fn fill_legacy_fund(df: &mut DataFrame) -> Result<bool, SchemaError> {
        if df.schema().contains("fund") {
            return Ok(false);
        }
        let funds = vec![FundCode::LEGACY_DEFAULT.as_str(); df.height()];
        df.with_column(Column::new("fund".into(), funds))
            .map_err(|e| SchemaError::LegacyUpgrade(e.to_string()))?;
        Ok(true)
    }

    /// Validate DataFrame against schema
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        let expected = Self::schema();
        let actual = df.schema();

        for field in expected.iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("Could not add legacy fund column: {0}")]
    LegacyUpgrade(String),
}
