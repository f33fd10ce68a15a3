//! Bidirectional external id ↔ positional index mapping.

use std::collections::HashMap;

use super::descriptor::{
    EngineKey, PointDescriptor, PointError, PointTable, Role, VariableDeclaration,
};

/// Maps external point ids to the positional slots the engine exchanges.
///
/// Built once from a [`VariableDeclaration`] and a [`PointTable`]; lookups
/// afterwards are hash-table hits and never rescan the descriptors. The
/// mapping is immutable for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct PointResolver {
    descriptors: Vec<PointDescriptor>,
    outputs: HashMap<String, usize>,
    inputs: HashMap<String, usize>,
    enables: HashMap<String, usize>,
    output_count: usize,
    input_count: usize,
}

impl PointResolver {
    /// Resolves every binding in `table` against the slots in `declaration`.
    ///
    /// # Errors
    ///
    /// - [`PointError::UnresolvedMapping`] if a binding names a variable the
    ///   declaration lacks
    /// - [`PointError::DuplicateSlot`] if the declaration repeats a variable
    /// - [`PointError::DuplicatePoint`] if an id is bound twice in one role
    /// - [`PointError::SharedSlot`] if two ids bind the same slot
    /// - [`PointError::EmptyBinding`] / [`PointError::InvalidSlot`] for
    ///   structurally invalid entries
    pub fn new(declaration: &VariableDeclaration, table: &PointTable) -> Result<Self, PointError> {
        let mut output_slots: HashMap<EngineKey, usize> = HashMap::new();
        let mut input_slots: HashMap<EngineKey, usize> = HashMap::new();
        for (i, slot) in declaration.variables.iter().enumerate() {
            let key = slot.key(i)?;
            let slots = match key.role() {
                Role::Output => &mut output_slots,
                Role::Input => &mut input_slots,
            };
            let index = slots.len();
            if slots.contains_key(&key) {
                return Err(PointError::DuplicateSlot { key });
            }
            slots.insert(key, index);
        }

        let mut resolver = Self {
            descriptors: Vec::with_capacity(table.points.len()),
            outputs: HashMap::new(),
            inputs: HashMap::new(),
            enables: HashMap::new(),
            output_count: output_slots.len(),
            input_count: input_slots.len(),
        };
        // (role, slot) → owning id, to keep the mapping injective.
        let mut claimed: HashMap<(Role, usize), String> = HashMap::new();

        for binding in &table.points {
            let id = binding.id.as_str();
            if binding.output.is_none() && binding.input.is_none() {
                return Err(PointError::EmptyBinding { id: id.to_string() });
            }

            if let Some(output) = &binding.output {
                let key = EngineKey::output(&output.variable_type, &output.variable_name);
                let index = lookup(&output_slots, id, &key)?;
                claim(&mut claimed, Role::Output, index, id, &key)?;
                resolver.bind(id, key, index)?;
            }

            if let Some(input) = &binding.input {
                let key = EngineKey::input(&input.variable_name);
                let index = lookup(&input_slots, id, &key)?;
                claim(&mut claimed, Role::Input, index, id, &key)?;
                resolver.bind(id, key, index)?;

                if let Some(enable) = &input.enable {
                    let key = EngineKey::input(enable);
                    let index = lookup(&input_slots, id, &key)?;
                    claim(&mut claimed, Role::Input, index, id, &key)?;
                    resolver.enables.insert(id.to_string(), index);
                }
            }
        }

        Ok(resolver)
    }

    fn bind(&mut self, id: &str, key: EngineKey, index: usize) -> Result<(), PointError> {
        let role = key.role();
        let table = match role {
            Role::Output => &mut self.outputs,
            Role::Input => &mut self.inputs,
        };
        if table.insert(id.to_string(), index).is_some() {
            return Err(PointError::DuplicatePoint {
                id: id.to_string(),
                role,
            });
        }
        self.descriptors.push(PointDescriptor {
            external_id: id.to_string(),
            role,
            engine_key: key,
            positional_index: index,
        });
        Ok(())
    }

    /// Position of output point `id` in the engine's output vector.
    ///
    /// # Errors
    ///
    /// Returns [`PointError::NotFound`] if `id` is not an output point.
    pub fn resolve_output_index(&self, id: &str) -> Result<usize, PointError> {
        self.outputs
            .get(id)
            .copied()
            .ok_or_else(|| not_found(id, Role::Output))
    }

    /// Position of input point `id` in the controller's input vector.
    ///
    /// # Errors
    ///
    /// Returns [`PointError::NotFound`] if `id` is not an input point.
    pub fn resolve_input_index(&self, id: &str) -> Result<usize, PointError> {
        self.inputs
            .get(id)
            .copied()
            .ok_or_else(|| not_found(id, Role::Input))
    }

    /// Position of the enable companion of input point `id`, if it has one.
    pub fn enable_index(&self, id: &str) -> Option<usize> {
        self.enables.get(id).copied()
    }

    pub fn all_output_ids(&self) -> Vec<&str> {
        self.outputs.keys().map(String::as_str).collect()
    }

    pub fn all_input_ids(&self) -> Vec<&str> {
        self.inputs.keys().map(String::as_str).collect()
    }

    /// Descriptors in table order.
    pub fn descriptors(&self) -> &[PointDescriptor] {
        &self.descriptors
    }

    /// Length of the output vector the engine sends.
    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// Length of the input vector the engine expects.
    pub fn input_count(&self) -> usize {
        self.input_count
    }

    /// Picks every output point's value out of an engine output vector.
    ///
    /// Points whose slot lies beyond `values` are skipped.
    pub fn gather_outputs(&self, values: &[f64]) -> HashMap<String, f64> {
        self.outputs
            .iter()
            .filter_map(|(id, &index)| values.get(index).map(|v| (id.clone(), *v)))
            .collect()
    }
}

fn lookup(
    slots: &HashMap<EngineKey, usize>,
    id: &str,
    key: &EngineKey,
) -> Result<usize, PointError> {
    slots
        .get(key)
        .copied()
        .ok_or_else(|| PointError::UnresolvedMapping {
            id: id.to_string(),
            key: key.clone(),
        })
}

fn claim(
    claimed: &mut HashMap<(Role, usize), String>,
    role: Role,
    index: usize,
    id: &str,
    key: &EngineKey,
) -> Result<(), PointError> {
    match claimed.get(&(role, index)) {
        Some(owner) if owner == id => Err(PointError::DuplicatePoint {
            id: id.to_string(),
            role,
        }),
        Some(owner) => Err(PointError::SharedSlot {
            first: owner.clone(),
            second: id.to_string(),
            key: key.clone(),
        }),
        None => {
            claimed.insert((role, index), id.to_string());
            Ok(())
        }
    }
}

fn not_found(id: &str, role: Role) -> PointError {
    PointError::NotFound {
        id: id.to_string(),
        role,
    }
}
