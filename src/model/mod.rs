pub mod project;
pub mod state;
pub mod token;
pub mod window;

pub use project::{ProjectDescriptor, WorkspaceName};
pub use token::WindowToken;
pub use window::{WindowId, WindowRecord};
