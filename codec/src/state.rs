//! Whole-ghost state in application and quantized form.

use bitstream::ChangeMask;
use schema::GhostLayout;

use crate::error::{CodecError, CodecResult};
use crate::value::{dequantize, quantize, FieldValue, Quantized};

/// One component slot of a ghost.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComponentState {
    pub enabled: bool,
    /// Field values in declaration order.
    pub fields: Vec<FieldValue>,
}

/// Application-side state of a ghost, one entry per layout component slot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GhostState {
    pub components: Vec<ComponentState>,
}

impl GhostState {
    /// Zero-valued, enabled state for a ghost type.
    #[must_use]
    pub fn default_for(layout: &GhostLayout) -> Self {
        Self {
            components: layout
                .components
                .iter()
                .map(|c| ComponentState {
                    enabled: true,
                    fields: c
                        .fields
                        .iter()
                        .map(|f| FieldValue::default_for(f.kind))
                        .collect(),
                })
                .collect(),
        }
    }

    /// Reads a field by slot.
    #[must_use]
    pub fn field(&self, component: usize, field: usize) -> Option<&FieldValue> {
        self.components.get(component)?.fields.get(field)
    }

    /// Writes a field by slot. Returns `false` if the slot does not exist.
    pub fn set_field(&mut self, component: usize, field: usize, value: FieldValue) -> bool {
        match self
            .components
            .get_mut(component)
            .and_then(|c| c.fields.get_mut(field))
        {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Quantized replicated fields of a ghost, indexed by change-mask bit, plus
/// the enable bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuantizedState {
    pub fields: Vec<Quantized>,
    pub enabled: Vec<bool>,
}

impl QuantizedState {
    /// The implicit baseline of a spawn: every field zero, every component
    /// enabled.
    #[must_use]
    pub fn default_for(layout: &GhostLayout) -> Self {
        let mut fields = Vec::with_capacity(layout.change_mask_bits);
        for (_, component) in layout.replicated_components() {
            fields.extend(component.fields.iter().map(|f| Quantized::default_for(f.kind)));
        }
        Self {
            fields,
            enabled: vec![true; layout.enable_bits],
        }
    }

    /// Quantizes the replicated part of `state`.
    pub fn from_state(layout: &GhostLayout, state: &GhostState) -> CodecResult<Self> {
        check_shape(layout, state)?;
        let mut fields = Vec::with_capacity(layout.change_mask_bits);
        let mut enabled = vec![true; layout.enable_bits];
        for (slot, component) in layout.components.iter().enumerate() {
            let values = &state.components[slot];
            if let Some(bit) = component.enable_bit {
                enabled[bit] = values.enabled;
            }
            if !component.replicated {
                continue;
            }
            for (def, value) in component.fields.iter().zip(&values.fields) {
                fields.push(quantize(def, value)?);
            }
        }
        Ok(Self { fields, enabled })
    }

    /// Writes the replicated fields and enable bits into `state`.
    ///
    /// Components that are not replicated keep whatever `state` holds.
    pub fn apply_to(&self, layout: &GhostLayout, state: &mut GhostState) -> CodecResult<()> {
        check_shape(layout, state)?;
        for (slot, component) in layout.components.iter().enumerate() {
            let target = &mut state.components[slot];
            if let Some(bit) = component.enable_bit {
                target.enabled = self.enabled[bit];
            }
            if !component.replicated {
                continue;
            }
            for (i, def) in component.fields.iter().enumerate() {
                target.fields[i] = dequantize(def, &self.fields[component.field_bit(i)])?;
            }
        }
        Ok(())
    }

    /// Bits of fields that differ from `baseline`.
    #[must_use]
    pub fn diff(&self, baseline: &Self) -> ChangeMask {
        let mut mask = ChangeMask::new(self.fields.len());
        for (bit, (a, b)) in self.fields.iter().zip(&baseline.fields).enumerate() {
            if a != b {
                // In range by construction.
                let _ = mask.set(bit, true);
            }
        }
        mask
    }
}

fn check_shape(layout: &GhostLayout, state: &GhostState) -> CodecResult<()> {
    let matches = state.components.len() == layout.components.len()
        && layout
            .components
            .iter()
            .zip(&state.components)
            .all(|(c, s)| c.fields.len() == s.fields.len());
    if matches {
        Ok(())
    } else {
        Err(CodecError::StateShapeMismatch {
            ghost_type: layout.name.clone(),
        })
    }
}
