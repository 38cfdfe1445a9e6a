//! 分页结果物化
//!
//! 列表接口：has_more 为真时以最后一条的 id 作为 starting_after 继续取；
//! 搜索接口：以 next_page 作为 page 继续取。超过页数上限视为上游错误。

use serde_json::Value;

use crate::core::credentials::Credential;
use crate::dispatch::schema::ParamValue;
use crate::dispatch::stripe::client::{ApiRequest, StripeApi, StripeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// 列表接口（/v1/customers 等）
    StartingAfter,
    /// 搜索接口（/v1/customers/search）
    NextPage,
}

impl Cursor {
    fn param(self) -> &'static str {
        match self {
            Cursor::StartingAfter => "starting_after",
            Cursor::NextPage => "page",
        }
    }
}

/// 逐页拉取直到 has_more 为假，返回按顺序拼接的全部条目
pub async fn drain(
    api: &dyn StripeApi,
    credential: &Credential,
    mut request: ApiRequest,
    cursor: Cursor,
    max_pages: usize,
) -> Result<Vec<Value>, StripeError> {
    let mut items = Vec::new();

    for page_no in 0..max_pages {
        let page = api.send(credential, request.clone()).await?;
        let data = page
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| StripeError::Decode("list response has no data array".to_string()))?;
        items.extend(data.iter().cloned());

        let has_more = page.get("has_more").and_then(Value::as_bool).unwrap_or(false);
        if !has_more {
            tracing::debug!(path = %request.path, pages = page_no + 1, items = items.len(), "pagination drained");
            return Ok(items);
        }

        let next = match cursor {
            Cursor::StartingAfter => data.last().and_then(|v| v.get("id")).and_then(Value::as_str),
            Cursor::NextPage => page.get("next_page").and_then(Value::as_str),
        };
        match next {
            Some(token) => request
                .params
                .set(cursor.param(), ParamValue::String(token.to_string())),
            None => return Ok(items),
        }
    }

    Err(StripeError::PageLimit(max_pages))
}
