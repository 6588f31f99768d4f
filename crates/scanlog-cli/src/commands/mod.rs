pub(crate) mod auth;
pub(crate) mod profile;
pub(crate) mod record;
pub(crate) mod sync;
