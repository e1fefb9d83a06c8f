use crate::config::ColumnSchema;
use crate::error::{RecError, Result, Stage};
use crate::models::FeatureTable;
use ndarray::ArrayView1;

/// Checks that every column the pipeline reads is present, that identifiers are
/// non-negative integers and that the label is binary.
pub fn validate_schema(table: &FeatureTable, schema: &ColumnSchema) -> Result<()> {
    let absent: Vec<String> = schema
        .required_columns()
        .into_iter()
        .filter(|name| !table.has_column(name))
        .collect();
    if !absent.is_empty() {
        return Err(RecError::schema(
            Stage::Data,
            format!("missing required columns: {}", absent.join(", ")),
        ));
    }

    validate_index_column(table.column(&schema.user_column)?, &schema.user_column)?;
    validate_index_column(table.column(&schema.item_column)?, &schema.item_column)?;
    validate_label_column(table.column(&schema.label_column)?, &schema.label_column)?;
    Ok(())
}

/// Dense zero-based index column: every value is a non-negative integer.
pub fn validate_index_column(values: ArrayView1<'_, f64>, name: &str) -> Result<()> {
    for (row, &value) in values.iter().enumerate() {
        as_index(value).ok_or_else(|| {
            RecError::schema(
                Stage::Data,
                format!(
                    "column '{}' row {}: {} is not a non-negative integer index",
                    name, row, value
                ),
            )
        })?;
    }
    Ok(())
}

pub fn validate_label_column(values: ArrayView1<'_, f64>, name: &str) -> Result<()> {
    for (row, &value) in values.iter().enumerate() {
        as_label(value).ok_or_else(|| {
            RecError::schema(
                Stage::Data,
                format!("column '{}' row {}: label {} is not 0 or 1", name, row, value),
            )
        })?;
    }
    Ok(())
}

pub fn as_index(value: f64) -> Option<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= usize::MAX as f64 {
        Some(value as usize)
    } else {
        None
    }
}

pub fn as_label(value: f64) -> Option<u8> {
    if value == 0.0 {
        Some(0)
    } else if value == 1.0 {
        Some(1)
    } else {
        None
    }
}

pub fn validate_feature_vector(features: &[f64], expected_dim: usize, stage: Stage) -> Result<()> {
    if features.len() != expected_dim {
        return Err(RecError::dimension_mismatch(
            stage,
            "feature vector",
            expected_dim,
            features.len(),
        ));
    }
    if let Some(position) = features.iter().position(|v| !v.is_finite()) {
        return Err(RecError::schema(
            stage,
            format!("feature {} is not finite", position),
        ));
    }
    Ok(())
}
