/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_update
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Self-update and rollback subsystem for Syn-Syu: release
    feed client, changelog diffing, rollback points with
    health-gated restore, and the update transaction.

  Security / Safety Notes:
    Operates within user privileges. Executes the package
    manager, tar, and the installed binary; performs HTTPS GET
    requests only. Release artifacts are not signature-checked.

  Dependencies:
    See Cargo.toml; components are wired in `updater`.

  Operational Scope:
    Embedded by the Syn-Syu CLI layer and used by the bundled
    `synsyu-update` binary.

  Revision History:
    2026-10-18 COD  Established update subsystem crate.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Durable, append-only state
============================================================*/

pub mod config;
pub mod diff;
pub mod error;
pub mod feed;
pub mod health;
pub mod history;
pub mod lock;
pub mod logger;
pub mod process;
pub mod rollback;
pub mod updater;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use config::UpdaterConfig;
pub use diff::{
    generate_summary, get_recommended_action, has_security_fixes, requires_user_action,
    RecommendedAction, ReleaseDiffGenerator, VersionDiff,
};
pub use error::{Result, UpdateError};
pub use feed::{ReleaseAsset, ReleaseFeedClient, ReleaseInfo, UpdateCheckResult};
pub use health::HealthCheckResult;
pub use history::UpdateHistory;
pub use logger::Logger;
pub use rollback::{RollbackManager, RollbackPoint};
pub use updater::{UpdateManager, CHANGELOG_UNAVAILABLE};
pub use version::UpdateType;
