//! Core library for the `SkillForge` terminal simulator.
//!
//! This crate provides the engine behind interactive command-line lessons:
//! - In-memory virtual file system and per-session simulator state
//! - Command tokenizing and routing with a generative fallback
//! - Deterministic shell, python, pip, git, docker and kubectl emulators
//! - Staged answer validation with an optional generative judge
//! - Escalating hints over repeated failed attempts
//! - YAML configuration and atomic JSON persistence

pub mod config;
pub mod emulators;
pub mod engine;
pub mod generative;
pub mod hints;
pub mod matcher;
pub mod persist;
pub mod router;
pub mod state;
pub mod tokenize;
pub mod types;
pub mod validator;
pub mod vfs;

pub use config::{ConfigError, ConfigOverrides, EngineConfig, apply_overrides, load_config};
pub use engine::{Engine, Submission};
pub use generative::{GenerativeError, Judge, OutputSynthesizer};
pub use hints::{AttemptTracker, HintGenerator};
pub use matcher::{ClassifierScope, CommandClassifier};
pub use persist::{PersistError, load_json, save_json};
pub use router::{Router, RuleTable};
pub use state::SimulatorState;
pub use types::*;
pub use validator::Validator;
pub use vfs::{Vfs, VfsError};
