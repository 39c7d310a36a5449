pub mod identity;
pub mod query;
pub mod server;

pub use identity::Identity;
pub use query::{
    ListingScope, Pagination, ServerPage, ServerQuery, ServerQueryParams, SortField, SortOrder,
};
pub use server::{
    CreateServerRequest, Organization, Server, ServerStatus, ServerSummary, UpdateServerRequest,
};
