pub mod session;

pub use session::{
    optional_session_middleware, session_middleware, ClientIp, CurrentSession,
    DEVICE_FINGERPRINT_HEADER,
};
