// ── Runtime state ──
//
// In-memory session table and per-client locks. The persisted copy lives
// behind `repository::SessionRepository`.

mod locks;
mod session_table;

pub(crate) use locks::ClientLocks;
pub(crate) use session_table::SessionTable;
