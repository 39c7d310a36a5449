use crate::constants::pagination::{DEFAULT_PAGE, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::errors::ToolError;
use crate::models::server::ServerSummary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Name,
    Host,
    Port,
    Username,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub const ALL: [SortField; 6] = [
        SortField::Name,
        SortField::Host,
        SortField::Port,
        SortField::Username,
        SortField::CreatedAt,
        SortField::UpdatedAt,
    ];

    /// Column name; also the accepted wire value. Safe to splice into SQL.
    pub fn column(self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Host => "host",
            SortField::Port => "port",
            SortField::Username => "username",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ToolError> {
        let trimmed = value.trim();
        SortField::ALL
            .into_iter()
            .find(|field| field.column() == trimmed)
            .ok_or_else(|| {
                let allowed: Vec<&str> = SortField::ALL.iter().map(|f| f.column()).collect();
                ToolError::invalid_field(format!("invalid sort field: {}", trimmed))
                    .with_hint(format!("Use one of: {}.", allowed.join(", ")))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Anything other than `asc` sorts descending.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Raw listing parameters as they arrive from the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerQueryParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Normalized listing query. Constructing one is the only way to reach the
/// store, so an unknown sort field never produces a storage round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerQuery {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
}

impl Default for ServerQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
            search: None,
            sort_field: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
        }
    }
}

impl ServerQuery {
    pub fn from_params(params: &ServerQueryParams) -> Result<Self, ToolError> {
        let sort_field = match params.sort_by.as_deref().map(str::trim) {
            None | Some("") => SortField::CreatedAt,
            Some(raw) => SortField::parse(raw)?,
        };
        let page = match params.page {
            Some(p) if p > 0 => u32::try_from(p).unwrap_or(u32::MAX),
            _ => DEFAULT_PAGE,
        };
        let page_size = match params.page_size {
            Some(size) if size > 0 && size <= MAX_PAGE_SIZE as i64 => size as u32,
            _ => DEFAULT_PAGE_SIZE,
        };
        let search = params
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self {
            page,
            page_size,
            search,
            sort_field,
            sort_order: SortOrder::parse_lenient(params.sort_order.as_deref()),
        })
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }

    pub fn limit(&self) -> u64 {
        self.page_size as u64
    }
}

/// Listing is scoped to the organization *and* the requesting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingScope {
    pub organization_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub current_page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub total_items: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn compute(page: u32, page_size: u32, total_items: u64) -> Self {
        let size = page_size.max(1) as u64;
        let total_pages = total_items.div_ceil(size);
        Self {
            current_page: page,
            page_size,
            total_pages,
            total_items,
            has_next: (page as u64) < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerPage {
    pub servers: Vec<ServerSummary>,
    pub pagination: Pagination,
}
