pub mod console;
pub mod password;
pub mod registration;
pub mod session;

pub use console::*;
pub use password::*;
pub use registration::*;
pub use session::*;
