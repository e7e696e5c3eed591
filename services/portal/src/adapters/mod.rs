pub mod clock;
pub mod connectivity;
pub mod http;
pub mod storage;
pub mod supabase_auth;

pub use clock::{ManualClock, SystemClock};
pub use connectivity::NetworkStatus;
pub use http::ReqwestTransport;
pub use storage::{FileStorage, MemoryStorage};
pub use supabase_auth::SupabaseAuth;
