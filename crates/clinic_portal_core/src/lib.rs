pub mod domain;
pub mod ports;

pub use domain::{
    CacheEntry, Credentials, HttpRequest, HttpResponse, Method, NotificationEvent,
    NotificationLevel, Role, Session, UnknownRole,
};
pub use ports::{AuthProvider, Clock, Connectivity, HttpTransport, KeyValueStorage, PortError, PortResult};
