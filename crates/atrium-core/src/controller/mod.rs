//! Admin controllers.
//!
//! Each controller wraps a [`Connection`](crate::gateway::Connection) and
//! turns one page's worth of directory state into the shape the page needs.
//! Controllers hold no state across requests.

pub mod drivespace;
pub mod experimenter;
pub mod group;
pub mod upload;

pub use drivespace::DriveSpaceController;
pub use experimenter::{ExperimenterController, ExperimenterRow, ExperimentersController, MyAccount};
pub use group::{GroupController, GroupRow, GroupsController};
pub use upload::UploadController;
