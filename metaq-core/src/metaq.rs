//! Metaq transform pipeline
//!
//! Resolves a raw, type-partitioned delivery of timed declarations into
//! schedulable cues. Resolution runs in strict phases over the whole delivery:
//!
//! 1. **Clone expansion**: every declaration of a type with `clone` targets is
//!    copied onto each target type's list (created on demand). Copies are not
//!    cloned again.
//! 2. **Composite resolution**: per type, in list order, overrides are merged
//!    over the declaration, a fixed `duration` rewrites `end = start + duration`,
//!    and a `sequence` back-patches the previous member's `end` to this
//!    declaration's `start`.
//! 3. **Scheduling**: every resolved declaration is handed to the backend
//!    registry, see [`Pipeline::run`].
//!
//! Declarations are never re-sorted by time. All ordering is delivery order.

use crate::config::TypeConfig;
use crate::cue::Declaration;
use crate::scheduler::BackendRegistry;
use crate::Result;
use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::HashMap;

/// Type name → ordered declarations
pub type Metaq = IndexMap<String, Vec<Declaration>>;

/// Position of a declaration inside a [`Metaq`]: (type index, declaration index)
type Slot = (usize, usize);

/// Pipeline bound to one set of type configurations
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    types: IndexMap<String, TypeConfig>,
}

impl Pipeline {
    pub fn new(types: IndexMap<String, TypeConfig>) -> Self {
        Self { types }
    }

    pub fn types(&self) -> &IndexMap<String, TypeConfig> {
        &self.types
    }

    /// Resolves a delivery and schedules every resolved declaration
    pub fn run(&self, raw: Metaq, backends: &mut BackendRegistry) -> Result<Metaq> {
        let resolved = self.resolve(raw);
        backends.schedule(&resolved, |_| true)?;
        Ok(resolved)
    }

    /// Runs phases 1 and 2 over a whole delivery.
    ///
    /// Sequence bookkeeping lives only for the duration of this call.
    pub fn resolve(&self, raw: Metaq) -> Metaq {
        let raw = drop_malformed(raw);
        let mut metaq = self.expand_clones(raw);
        self.resolve_composites(&mut metaq);
        metaq
    }

    /// Phase 1: append a copy of each declaration to its type's clone targets
    pub fn expand_clones(&self, raw: Metaq) -> Metaq {
        let mut expanded = raw.clone();
        for (cue_type, declarations) in &raw {
            let Some(config) = self.types.get(cue_type) else {
                continue;
            };
            for target in &config.clone {
                debug!("cloning {} '{}' declarations into '{}'", declarations.len(), cue_type, target);
            }
            for declaration in declarations {
                for target in &config.clone {
                    expanded
                        .entry(target.clone())
                        .or_default()
                        .push(declaration.clone());
                }
            }
        }
        expanded
    }

    /// Phase 2: overrides, duration-derived ends and sequence chaining
    pub fn resolve_composites(&self, metaq: &mut Metaq) {
        let mut last_in_sequence: HashMap<String, Slot> = HashMap::new();

        for type_index in 0..metaq.len() {
            let Some(cue_type) = metaq.get_index(type_index).map(|(t, _)| t.clone()) else {
                continue;
            };
            let Some(config) = self.types.get(&cue_type) else {
                continue;
            };

            for decl_index in 0..metaq[type_index].len() {
                let declaration = &mut metaq[type_index][decl_index];

                if let Some(overrides) = &config.overrides {
                    declaration.merge(overrides);
                }

                let start = declaration.start();

                if let (Some(duration), Some(start)) = (config.duration, start) {
                    declaration.set_end(start + duration);
                }

                if let Some(sequence) = &config.sequence {
                    let Some(start) = start else {
                        warn!("'{}' declaration lost its start to overrides; not chained", cue_type);
                        continue;
                    };
                    let slot = (type_index, decl_index);
                    if let Some((prev_type, prev_decl)) = last_in_sequence.insert(sequence.clone(), slot) {
                        metaq[prev_type][prev_decl].set_end(start);
                    }
                }
            }
        }

        warn_inverted(metaq);
    }
}

/// Skips declarations without a numeric start
fn drop_malformed(raw: Metaq) -> Metaq {
    raw.into_iter()
        .map(|(cue_type, declarations)| {
            let total = declarations.len();
            let kept: Vec<Declaration> = declarations
                .into_iter()
                .filter(|d| d.start().is_some())
                .collect();
            if kept.len() < total {
                warn!(
                    "skipping {} '{}' declarations without a numeric start",
                    total - kept.len(),
                    cue_type
                );
            }
            (cue_type, kept)
        })
        .collect()
}

fn warn_inverted(metaq: &Metaq) {
    for (cue_type, declarations) in metaq {
        for declaration in declarations {
            if let (Some(start), Some(end)) = (declaration.start(), declaration.end()) {
                if end < start {
                    warn!("'{}' cue ends at {} before it starts at {}", cue_type, end, start);
                }
            }
        }
    }
}
