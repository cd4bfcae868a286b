// ── Editor component abstraction ──────────────────────────────────────────────
//
// Per-tab document state.  Rendering belongs to whichever front end drives
// `App`; nothing in here knows about windows or widgets.

pub(crate) mod surface;

pub(crate) use surface::{EditingSurface, SurfaceId};
