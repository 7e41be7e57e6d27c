pub mod command;
pub mod config;
pub mod error;
pub mod process;
pub mod program;
pub mod protocol;
pub mod supervisor;

pub use command::{CommandResult, exec, exec_for_json};
pub use config::{FileConfig, Store, UpdaterConfig};
pub use error::{Error, ErrorKind, Result, UpdateError};
pub use process::{ExitStatus, ProcessInfo, Signal, send_signal};
pub use program::{ExitPolicy, Program, ProgramState, Supervised};
pub use protocol::{
    Asset, Time, Update, UpdateAction, UpdateOptions, UpdatePromptOptions, UpdatePromptResponse,
    UpdateType,
};
pub use supervisor::{ProcessEnumerator, SupervisorEvent};
