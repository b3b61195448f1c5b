// Library root
// -----------
// This crate exposes the account tooling as a library; the binary
// (`main.rs`) wires it into an interactive menu.
//
// Module responsibilities:
// - `config`: settings file + environment overrides, endpoint layout.
// - `api`: the `Transport` seam and the blocking reqwest client behind it.
// - `session`: parsing, validating and composing session blobs.
// - `store`: the JSON credential store keyed by remote user id.
// - `acquirer`: credential login and derived-token harvesting.
// - `prober`: ordered fallback heuristics for the shield flag.
// - `guard`: the shield toggle itself.
// - `executor`: the repeat-action loop.
// - `activity`: month-rotated audit logs.
// - `context`: the object carrying config, transport and logs to components.
// - `ui`: terminal menus built on `dialoguer`.
pub mod acquirer;
pub mod activity;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod guard;
pub mod prober;
pub mod session;
pub mod store;
pub mod ui;

pub use error::Error;
