//! CLI command implementations.
//!
//! | Module   | Commands handled    |
//! |----------|---------------------|
//! | `serve`  | `Serve`, `InitDb`   |
//! | `config` | `Config`            |

pub mod config;
pub mod serve;

pub use config::{cmd_config, load_config};
pub use serve::{ServeOverrides, cmd_init_db, cmd_serve};
