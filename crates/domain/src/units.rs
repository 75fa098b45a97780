//! Quantity types and unit conversion.
//!
//! Each quantity type owns a set of units related to a base unit by an
//! affine transform: `base = value * rel_times + rel_add`, chained through
//! `rel_unit` references. Conversion walks the chain to the base and back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A unit of a quantity type, optionally defined relative to another unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_times: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_add: Option<f64>,
}

/// A quantity type (temperature, volume, ...) and its units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityType {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<Unit>,
}

/// Conversion failure.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("unknown quantity type {0}")]
    UnknownQuantity(String),
    #[error("unknown unit {unit} for quantity {quantity}")]
    UnknownUnit { quantity: String, unit: String },
    #[error("circular unit definition for {unit} in quantity {quantity}")]
    CircularDefinition { quantity: String, unit: String },
}

/// Lookup table over all configured quantity types.
#[derive(Debug, Default)]
pub struct UnitTable {
    quantities: HashMap<String, QuantityType>,
}

impl UnitTable {
    #[must_use]
    pub fn new(quantities: Vec<QuantityType>) -> Self {
        Self {
            quantities: quantities.into_iter().map(|q| (q.id.clone(), q)).collect(),
        }
    }

    #[must_use]
    pub fn quantity(&self, id: &str) -> Option<&QuantityType> {
        self.quantities.get(id)
    }

    /// Convert `value` between two units of one quantity type.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError`] when the quantity or either unit is unknown,
    /// or a unit chain loops.
    pub fn convert(
        &self,
        value: f64,
        quantity: &str,
        from_unit: &str,
        to_unit: &str,
    ) -> Result<f64, ConvertError> {
        if from_unit == to_unit {
            return Ok(value);
        }
        let quantity_type = self
            .quantity(quantity)
            .ok_or_else(|| ConvertError::UnknownQuantity(quantity.to_string()))?;
        let base = to_base(quantity_type, from_unit, value)?;
        from_base(quantity_type, to_unit, base)
    }
}

fn find_unit<'a>(quantity: &'a QuantityType, unit: &str) -> Result<&'a Unit, ConvertError> {
    quantity
        .units
        .iter()
        .find(|u| u.id == unit)
        .ok_or_else(|| ConvertError::UnknownUnit {
            quantity: quantity.id.clone(),
            unit: unit.to_string(),
        })
}

fn to_base(quantity: &QuantityType, unit: &str, value: f64) -> Result<f64, ConvertError> {
    let mut current = find_unit(quantity, unit)?;
    let mut value = value;
    let mut hops = 0;
    while let Some(rel) = &current.rel_unit {
        value = value * current.rel_times.unwrap_or(1.0) + current.rel_add.unwrap_or(0.0);
        current = find_unit(quantity, rel)?;
        hops += 1;
        if hops > quantity.units.len() {
            return Err(ConvertError::CircularDefinition {
                quantity: quantity.id.clone(),
                unit: unit.to_string(),
            });
        }
    }
    Ok(value)
}

fn from_base(quantity: &QuantityType, unit: &str, value: f64) -> Result<f64, ConvertError> {
    // Collect the chain from the target unit up to the base, then apply the
    // inverse transforms base-first.
    let mut chain = Vec::new();
    let mut current = find_unit(quantity, unit)?;
    while let Some(rel) = &current.rel_unit {
        chain.push(current);
        current = find_unit(quantity, rel)?;
        if chain.len() > quantity.units.len() {
            return Err(ConvertError::CircularDefinition {
                quantity: quantity.id.clone(),
                unit: unit.to_string(),
            });
        }
    }
    let mut value = value;
    for link in chain.iter().rev() {
        value = (value - link.rel_add.unwrap_or(0.0)) / link.rel_times.unwrap_or(1.0);
    }
    Ok(value)
}
