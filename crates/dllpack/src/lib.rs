//! dllpack: a JavaScript bundler that splits vendor packages into a prebuilt
//! library bundle, plus a watch-mode JSX/ES2015 compiler and a mock data generator.

pub mod bundler;
pub mod config;
pub mod error;
pub mod graph;
pub mod js;
pub mod linker;
pub mod manifest;
pub mod mock;
pub mod output;
pub mod resolver;
pub mod runtime;
pub mod transform;
pub mod vendor;
pub mod watch;
