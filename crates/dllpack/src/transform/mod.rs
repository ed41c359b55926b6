//! Deterministic source-to-source transforms.
//!
//! Every pass is a pure function of its input text. Passes are chained in a
//! [`Pipeline`]; the `babel` pipeline (JSX then ES2015 down-levelling) is what the
//! `babel` loader runs before linking, and the watch loop adds the CommonJS pass.

use log::trace;

use crate::error::TransformError;

mod bindings;
pub mod classes;
pub mod es2015;
pub mod jsx;
pub mod modules;
pub mod style;

pub use es2015::Es2015;
pub use jsx::{Jsx, JsxOptions};
pub use modules::CommonJs;
pub use style::Style;

/// A single source-to-source rewrite
pub trait Transform: std::fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Rewrite `source`; the same input always yields the same output
    fn apply(&self, source: &str) -> Result<String, TransformError>;
}

/// Ordered chain of transforms applied one after another
#[derive(Debug, Default)]
pub struct Pipeline {
    passes: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pass to the end of the chain
    #[must_use]
    pub fn with(mut self, pass: impl Transform + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// JSX compilation followed by ES2015 down-levelling
    pub fn babel(jsx: &JsxOptions) -> Self {
        Self::new().with(Jsx::new(jsx.clone())).with(Es2015)
    }

    /// The babel passes followed by the CommonJS module rewrite, for standalone files
    pub fn standalone(jsx: &JsxOptions) -> Self {
        Self::babel(jsx).with(CommonJs)
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl Transform for Pipeline {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn apply(&self, source: &str) -> Result<String, TransformError> {
        let mut current = source.to_owned();
        for pass in &self.passes {
            trace!("Applying transform pass '{}'", pass.name());
            current = pass.apply(&current)?;
        }
        Ok(current)
    }
}
