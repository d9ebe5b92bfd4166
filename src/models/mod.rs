// Re-export all model types
pub use self::car::*;
pub use self::errors::*;
pub use self::user::*;
pub use self::validation::*;

mod car;
mod errors;
mod user;
mod validation;
