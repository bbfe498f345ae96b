mod backup;
mod backups;
mod schedule;
mod status;

// Backup / restore commands
pub use backup::{run_backup, run_restore};

// Remote artifact commands
pub use backups::{run_delete, run_download, run_list_backups};

// Schedule commands
pub use schedule::{set_schedule, show_schedule};

// Status commands
pub use status::run_status;
