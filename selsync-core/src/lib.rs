mod account;
mod client;

pub use account::{Account, AccountError, Credentials, DEFAULT_DAV_PATH, concat_url_path};
pub use client::{
    ApiErrorClass, DavClient, DavError, DirectoryListing, LSCOL_PROPERTIES, ServerStatus,
};
