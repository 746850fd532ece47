pub mod link;

pub use link::{
    BulkDeleteRequest, BulkDeleteResponse, CreateLinkRequest, Link, LinkPage, LinkResponse,
    NewLink, RedirectType, UpdateLinkRequest,
};
