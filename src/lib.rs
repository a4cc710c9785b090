//! # hx-env
//!
//! Client-side encrypted synchronisation of per-environment `.env` files with
//! the Hyphen environment store.
//!
//! ## Features
//!
//! - **End-to-end encryption**: env files are encrypted locally with the project key; the server only stores ciphertext
//! - **Versioned history**: every push stores a new version, and any stored version can be pulled back
//! - **Conflict detection**: a push never overwrites cloud versions it has not seen, a pull never overwrites unsynced local edits
//! - **Key rotation**: re-encrypt every environment of a project under a fresh key, resumable after interruption
//! - **Monorepos**: one project key shared by several apps in one workspace
//!
//! ## Quick Start
//!
//! ```bash
//! # Push every .env.<name> file in the workspace
//! hx-env push
//!
//! # Push one environment
//! hx-env push --environment production
//!
//! # Pull everything, or one environment at a stored version
//! hx-env pull
//! hx-env pull --environment production --version 3
//!
//! # Rotate the project key
//! hx-env rotate-key --yes
//! ```
//!
//! ## Files
//!
//! | File | Purpose |
//! |------|---------|
//! | `.env` | The default environment |
//! | `.env.<name>` | A named environment |
//! | `.hx` | Workspace configuration (also `~/.hx`, which holds the sync cache) |
//! | `.hxkey` | Local project key when running with `--local-secret` |
//!
//! ## Data Flow
//!
//! **Push:**
//! ```text
//! .env.<name> → hash → compare with cache → encrypt (AES-256-CFB) → put_env → cache
//! ```
//!
//! **Pull:**
//! ```text
//! get_env → key by secret_key_id → decrypt → validate → .env.<name> → cache
//! ```
//!
//! ## Module Overview
//!
//! - [`crypto`] - AES-256-CFB encryption of env contents
//! - [`key`] - Key records and `.hxkey` files
//! - [`keystore`] - Resolving, minting and publishing project keys
//! - [`envfile`] - Environment names and env file contents
//! - [`cache`] - The per-user sync cache in `~/.hx`
//! - [`config`] - Layered workspace configuration
//! - [`api`] - The remote store and key service over HTTPS
//! - [`sync`] - Push and pull
//! - [`rotation`] - Project key rotation
//! - [`commands`] - The command line surface
//! - [`error`] - Error types
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib
//! cargo test --test push_test
//! cargo test --test pull_test
//! cargo test --test rotation_test
//! cargo test --test cli_test
//! ```

pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod envfile;
pub mod error;
pub mod fsutil;
pub mod git;
pub mod key;
pub mod keystore;
pub mod rotation;
pub mod sync;

pub use crypto::CryptoKey;
pub use envfile::{EnvFile, EnvName};
pub use error::{HxError, Result};
pub use key::KeyRecord;
pub use keystore::KeyStore;
pub use sync::{SyncTarget, Synchroniser};
