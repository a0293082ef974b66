//! Static tool catalog and on-disk install state.
//!
//! Every tool loam provisions is described once by an immutable
//! [`ToolSpec`]. Whether a tool is installed is never cached across
//! processes: [`InstallState::probe`] recomputes it from the filesystem on
//! every invocation.
//!
//! # Layout
//!
//! ```text
//! <install root>/
//! ├── pig-0.9/
//! │   ├── bin/pig
//! │   └── .loam-install.json
//! ├── jython/jython.jar
//! ├── hadoop/bin/hadoop
//! └── sqoop/bin/sqoop
//! ```

mod spec;
mod state;

pub use spec::{ArchiveDirRule, PigVersion, ToolId, ToolRole, ToolSpec};
pub use state::{INSTALL_RECORD_FILE, InstallRecord, InstallState};
