//! USSD registration and PIN-management dialog.

pub mod level;
pub mod menu;
pub mod router;
pub mod routes;
pub mod session;
pub(crate) mod tokenizer;
pub mod validators;

pub use level::Level;
pub use menu::Screen;
pub use router::UssdRouter;
pub use routes::{UssdRouteState, ussd_routes};
pub use session::{GatewayRequest, UssdSession};
