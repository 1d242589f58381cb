//! Scheduler dispatch: routes resolved declarations to named backends.
//!
//! Backends are external renderers or plugins (an overlay scheduler, a
//! captions renderer, ...) registered under the cue type they consume. The
//! registry is an explicit object owned by whoever builds the pipeline.

use crate::cue::Declaration;
use crate::metaq::Metaq;
use crate::Result;
use log::debug;
use std::collections::HashMap;

/// A backend able to schedule cues of one type.
///
/// Backends are time-aware on their own; they receive each resolved
/// declaration once, at resolution time.
pub trait CueBackend: Send {
    fn schedule(&mut self, declaration: &Declaration) -> Result<()>;
}

impl<F> CueBackend for F
where
    F: FnMut(&Declaration) -> Result<()> + Send,
{
    fn schedule(&mut self, declaration: &Declaration) -> Result<()> {
        self(declaration)
    }
}

/// Cue type name → backend
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn CueBackend>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("types", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` for `cue_type`, returning any backend it replaced
    pub fn register<B>(&mut self, cue_type: &str, backend: B) -> Option<Box<dyn CueBackend>>
    where
        B: CueBackend + 'static,
    {
        self.backends.insert(cue_type.to_string(), Box::new(backend))
    }

    pub fn unregister(&mut self, cue_type: &str) -> Option<Box<dyn CueBackend>> {
        self.backends.remove(cue_type)
    }

    pub fn contains(&self, cue_type: &str) -> bool {
        self.backends.contains_key(cue_type)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Hands one declaration to the backend named by `cue_type`.
    ///
    /// Returns `Ok(false)` when no such backend is installed.
    pub fn dispatch(&mut self, cue_type: &str, declaration: &Declaration) -> Result<bool> {
        match self.backends.get_mut(cue_type) {
            Some(backend) => {
                backend.schedule(declaration)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Dispatches every declaration of every type accepted by `include`, in
    /// delivery order. The first backend error aborts the remaining work.
    ///
    /// Returns the number of declarations a backend accepted.
    pub fn schedule<F>(&mut self, metaq: &Metaq, include: F) -> Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        let mut scheduled = 0;
        for (cue_type, declarations) in metaq {
            if !include(cue_type.as_str()) {
                continue;
            }
            if !self.contains(cue_type) {
                debug!("no backend for '{}', skipping {} cues", cue_type, declarations.len());
                continue;
            }
            for declaration in declarations {
                if self.dispatch(cue_type, declaration)? {
                    scheduled += 1;
                }
            }
        }
        Ok(scheduled)
    }
}
