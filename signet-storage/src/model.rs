use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use signet_slo::regexp::check_order_by;

#[derive(Debug, Serialize, ToSchema, Default)]
pub struct List<T> {
    pub data: Vec<T>,
    pub limit: u64,
    pub offset: u64,
    pub total: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ID {
    pub id: String,
}

#[derive(Debug, Clone, Validate, ToSchema)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
    #[validate(custom(function = "check_order_by"))]
    pub order_by: Option<String>,
    // not part of the wire format, disables the count query
    pub count_disable: bool,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: Self::DEFAULT_OFFSET,
            order_by: Some(Self::DEFAULT_ORDER_BY.to_owned()),
            count_disable: false,
        }
    }
}

// Query-string values arrive as strings, so limit and offset are parsed by
// hand instead of relying on the derived integer deserializer.
impl<'de> Deserialize<'de> for Pagination {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            limit: Option<String>,
            offset: Option<String>,
            order_by: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let limit = match raw.limit {
            Some(v) => v.parse().map_err(|err| {
                serde::de::Error::custom(format_args!("invalid limit: {err}"))
            })?,
            None => Self::DEFAULT_LIMIT,
        };
        let offset = match raw.offset {
            Some(v) => v.parse().map_err(|err| {
                serde::de::Error::custom(format_args!(
                    "invalid offset: {err}"
                ))
            })?,
            None => Self::DEFAULT_OFFSET,
        };
        Ok(Pagination {
            limit,
            offset,
            order_by: raw
                .order_by
                .or_else(|| Some(Self::DEFAULT_ORDER_BY.to_owned())),
            count_disable: false,
        })
    }
}

impl Pagination {
    const DEFAULT_LIMIT: u64 = 20;
    const DEFAULT_OFFSET: u64 = 0;
    const DEFAULT_ORDER_BY: &'static str = "created_at DESC";

    pub fn convert(&self, wheres: &mut String) {
        if let Some(order_by) = &self.order_by {
            wheres.push_str(" ORDER BY ");
            wheres.push_str(order_by);
        }
        if self.limit > 0 {
            wheres.push_str(" LIMIT ");
            wheres.push_str(self.limit.to_string().as_str());
        }
        if self.offset > 0 {
            wheres.push_str(" OFFSET ");
            wheres.push_str(self.offset.to_string().as_str());
        }
    }
}
