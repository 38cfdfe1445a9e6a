//! Stripe 操作目录
//!
//! 每个操作是一条静态声明：id、HTTP 方法、路径模板、参数表、结果形态。
//! 新增操作只需在 STRIPE_OPERATIONS 中加一行（必要时加一张参数表）。
//! 路径中的 `{x}` 占位符对应必填字符串字段 x，调用时从请求体移出并替换进路径。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::credentials::{Credential, STRIPE_SCOPE};
use crate::core::ActionError;
use crate::dispatch::registry::{ActionOutput, Operation, OperationRegistry};
use crate::dispatch::schema::{Field, FieldKind, ParamValue, Params};
use crate::dispatch::stripe::client::{ApiRequest, HttpMethod, StripeApi};
use crate::dispatch::stripe::pagination::{drain, Cursor};

use self::ResponseKind::{List, Object, Search};
use crate::dispatch::schema::FieldKind::{
    Boolean as B, Integer as I, String as S, StringList as SL, StringMap as SM,
};
use crate::dispatch::stripe::client::HttpMethod::{Get, Post};

pub const STRIPE_NAMESPACE: &str = "stripe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Object,
    List,
    Search,
}

#[derive(Debug)]
pub struct OperationSpec {
    pub id: &'static str,
    pub method: HttpMethod,
    pub path: &'static str,
    pub fields: &'static [Field],
    pub response: ResponseKind,
    pub description: &'static str,
}

const fn opt(name: &'static str, kind: FieldKind) -> Field {
    Field::optional(name, kind)
}

const fn req(name: &'static str, kind: FieldKind) -> Field {
    Field::required(name, kind)
}

const LIST_CURSOR: [Field; 3] = [
    opt("limit", I),
    opt("starting_after", S),
    opt("ending_before", S),
];

const ADDRESS: &[Field] = &[
    opt("line1", S),
    opt("line2", S),
    opt("city", S),
    opt("state", S),
    opt("postal_code", S),
    opt("country", S),
];

const CUSTOMER_CREATE: &[Field] = &[
    opt("name", S),
    opt("email", S),
    opt("description", S),
    opt("phone", S),
    opt("address", FieldKind::Object(ADDRESS)),
    opt("payment_method", S),
    opt("preferred_locales", SL),
];

const CUSTOMER_LIST: &[Field] = &[opt("email", S), LIST_CURSOR[0], LIST_CURSOR[1], LIST_CURSOR[2]];

const CUSTOMER_SEARCH: &[Field] = &[req("query", S), opt("limit", I), opt("page", S)];

const CUSTOMER_GET: &[Field] = &[req("customer", S)];

const RECURRING: &[Field] = &[
    req("interval", S),
    opt("interval_count", I),
    opt("usage_type", S),
];

const PRODUCT_PRICE_DATA: &[Field] = &[
    req("currency", S),
    opt("unit_amount", I),
    opt("recurring", FieldKind::Object(RECURRING)),
    opt("tax_behavior", S),
];

const PRODUCT_CREATE: &[Field] = &[
    req("name", S),
    opt("description", S),
    opt("active", B),
    opt("images", SL),
    opt("url", S),
    opt("shippable", B),
    opt("tax_code", S),
    opt("unit_label", S),
    opt("statement_descriptor", S),
    opt("default_price_data", FieldKind::Object(PRODUCT_PRICE_DATA)),
];

const PRODUCT_UPDATE: &[Field] = &[
    req("id", S),
    opt("name", S),
    opt("description", S),
    opt("active", B),
    opt("images", SL),
    opt("url", S),
    opt("shippable", B),
    opt("default_price", S),
    opt("tax_code", S),
    opt("unit_label", S),
    opt("statement_descriptor", S),
];

const PRODUCT_GET: &[Field] = &[req("id", S)];

const PRODUCT_LIST: &[Field] = &[
    opt("active", B),
    opt("ids", SL),
    opt("shippable", B),
    opt("url", S),
    LIST_CURSOR[0],
    LIST_CURSOR[1],
    LIST_CURSOR[2],
];

const PRICE_PRODUCT_DATA: &[Field] = &[
    req("name", S),
    opt("active", B),
    opt("statement_descriptor", S),
    opt("unit_label", S),
    opt("metadata", SM),
];

const PRICE_CREATE: &[Field] = &[
    req("currency", S),
    opt("unit_amount", I),
    opt("product", S),
    opt("product_data", FieldKind::Object(PRICE_PRODUCT_DATA)),
    opt("recurring", FieldKind::Object(RECURRING)),
    opt("nickname", S),
    opt("lookup_key", S),
    opt("active", B),
    opt("billing_scheme", S),
    opt("tax_behavior", S),
    opt("transfer_lookup_key", B),
];

const PRICE_UPDATE: &[Field] = &[
    req("price", S),
    opt("active", B),
    opt("nickname", S),
    opt("lookup_key", S),
    opt("tax_behavior", S),
    opt("transfer_lookup_key", B),
];

const PRICE_GET: &[Field] = &[req("price", S)];

const PRICE_LIST_RECURRING: &[Field] = &[opt("interval", S), opt("usage_type", S)];

const PRICE_LIST: &[Field] = &[
    opt("active", B),
    opt("currency", S),
    opt("product", S),
    opt("type", S),
    opt("lookup_keys", SL),
    opt("recurring", FieldKind::Object(PRICE_LIST_RECURRING)),
    LIST_CURSOR[0],
    LIST_CURSOR[1],
    LIST_CURSOR[2],
];

const PAYMENT_LINK_ITEM: &[Field] = &[req("price", S), req("quantity", I)];

const REDIRECT: &[Field] = &[req("url", S)];

const AFTER_COMPLETION: &[Field] = &[
    req("type", S),
    opt("redirect", FieldKind::Object(REDIRECT)),
];

const PAYMENT_LINK_CREATE: &[Field] = &[
    req("line_items", FieldKind::ObjectList(PAYMENT_LINK_ITEM)),
    opt("after_completion", FieldKind::Object(AFTER_COMPLETION)),
    opt("allow_promotion_codes", B),
    opt("billing_address_collection", S),
    opt("currency", S),
    opt("customer_creation", S),
];

const INVOICE_CREATE: &[Field] = &[
    opt("customer", S),
    opt("auto_advance", B),
    opt("collection_method", S),
    opt("days_until_due", I),
    opt("due_date", I),
    opt("description", S),
    opt("currency", S),
    opt("footer", S),
    opt("subscription", S),
    opt("pending_invoice_items_behavior", S),
];

const INVOICE_ITEM_PRICE_DATA: &[Field] = &[
    req("currency", S),
    req("product", S),
    opt("unit_amount", I),
];

const INVOICE_ITEM_CREATE: &[Field] = &[
    req("customer", S),
    opt("amount", I),
    opt("currency", S),
    opt("description", S),
    opt("invoice", S),
    opt("price", S),
    opt("price_data", FieldKind::Object(INVOICE_ITEM_PRICE_DATA)),
    opt("quantity", I),
];

const INVOICE_FINALIZE: &[Field] = &[req("invoice", S), opt("auto_advance", B)];

const REFUND_CREATE: &[Field] = &[
    opt("charge", S),
    opt("payment_intent", S),
    opt("amount", I),
    opt("reason", S),
    opt("refund_application_fee", B),
    opt("reverse_transfer", B),
    opt("instructions_email", S),
];

const CHECKOUT_PRODUCT_DATA: &[Field] = &[req("name", S), opt("description", S), opt("images", SL)];

const CHECKOUT_PRICE_DATA: &[Field] = &[
    req("currency", S),
    opt("product", S),
    opt("product_data", FieldKind::Object(CHECKOUT_PRODUCT_DATA)),
    opt("unit_amount", I),
    opt("recurring", FieldKind::Object(RECURRING)),
];

const CHECKOUT_LINE_ITEM: &[Field] = &[
    opt("price", S),
    opt("quantity", I),
    opt("price_data", FieldKind::Object(CHECKOUT_PRICE_DATA)),
];

const CHECKOUT_SESSION_CREATE: &[Field] = &[
    opt("mode", S),
    opt("success_url", S),
    opt("cancel_url", S),
    opt("customer", S),
    opt("customer_email", S),
    opt("client_reference_id", S),
    opt("line_items", FieldKind::ObjectList(CHECKOUT_LINE_ITEM)),
    opt("payment_method_types", SL),
    opt("allow_promotion_codes", B),
    opt("expires_at", I),
    opt("locale", S),
];

const PORTAL_SESSION_CREATE: &[Field] = &[
    req("customer", S),
    opt("return_url", S),
    opt("configuration", S),
    opt("locale", S),
    opt("on_behalf_of", S),
];

const PORTAL_CONFIG_LIST: &[Field] = &[
    opt("active", B),
    opt("is_default", B),
    LIST_CURSOR[0],
    LIST_CURSOR[1],
    LIST_CURSOR[2],
];

const BUSINESS_PROFILE: &[Field] = &[
    opt("headline", S),
    opt("privacy_policy_url", S),
    opt("terms_of_service_url", S),
];

const TOGGLE: &[Field] = &[req("enabled", B)];

const CUSTOMER_UPDATE_FEATURE: &[Field] = &[req("enabled", B), opt("allowed_updates", SL)];

const SUBSCRIPTION_CANCEL_FEATURE: &[Field] = &[
    req("enabled", B),
    opt("mode", S),
    opt("proration_behavior", S),
];

const PORTAL_FEATURES: &[Field] = &[
    opt("customer_update", FieldKind::Object(CUSTOMER_UPDATE_FEATURE)),
    opt("invoice_history", FieldKind::Object(TOGGLE)),
    opt("payment_method_update", FieldKind::Object(TOGGLE)),
    opt("subscription_cancel", FieldKind::Object(SUBSCRIPTION_CANCEL_FEATURE)),
];

const PORTAL_CONFIG_CREATE: &[Field] = &[
    req("features", FieldKind::Object(PORTAL_FEATURES)),
    opt("business_profile", FieldKind::Object(BUSINESS_PROFILE)),
    opt("default_return_url", S),
    opt("login_page", FieldKind::Object(TOGGLE)),
];

const NO_FIELDS: &[Field] = &[];

const fn op(
    id: &'static str,
    method: HttpMethod,
    path: &'static str,
    fields: &'static [Field],
    response: ResponseKind,
    description: &'static str,
) -> OperationSpec {
    OperationSpec {
        id,
        method,
        path,
        fields,
        response,
        description,
    }
}

pub static STRIPE_OPERATIONS: &[OperationSpec] = &[
    op("stripe_post_customers", Post, "/v1/customers", CUSTOMER_CREATE, Object, "Create a customer"),
    op("stripe_get_customers", Get, "/v1/customers", CUSTOMER_LIST, List, "List all customers"),
    op("stripe_post_products", Post, "/v1/products", PRODUCT_CREATE, Object, "Create a product"),
    op("stripe_get_products", Get, "/v1/products", PRODUCT_LIST, List, "List all products"),
    op("stripe_post_prices", Post, "/v1/prices", PRICE_CREATE, Object, "Create a price"),
    op("stripe_get_prices", Get, "/v1/prices", PRICE_LIST, List, "List all prices"),
    op("stripe_post_payment_links", Post, "/v1/payment_links", PAYMENT_LINK_CREATE, Object, "Create a payment link"),
    op("stripe_post_invoices", Post, "/v1/invoices", INVOICE_CREATE, Object, "Create an invoice"),
    op("stripe_post_invoiceitems", Post, "/v1/invoiceitems", INVOICE_ITEM_CREATE, Object, "Create an invoice item"),
    op("stripe_post_invoices_invoice_finalize", Post, "/v1/invoices/{invoice}/finalize", INVOICE_FINALIZE, Object, "Finalize a draft invoice"),
    op("stripe_get_balance", Get, "/v1/balance", NO_FIELDS, Object, "Retrieve the account balance"),
    op("stripe_post_refunds", Post, "/v1/refunds", REFUND_CREATE, Object, "Create a refund"),
    op("stripe_post_products_id", Post, "/v1/products/{id}", PRODUCT_UPDATE, Object, "Update a product"),
    op("stripe_get_products_id", Get, "/v1/products/{id}", PRODUCT_GET, Object, "Retrieve a product"),
    op("stripe_post_checkout_sessions", Post, "/v1/checkout/sessions", CHECKOUT_SESSION_CREATE, Object, "Create a checkout session"),
    op("stripe_post_billing_portal_sessions", Post, "/v1/billing_portal/sessions", PORTAL_SESSION_CREATE, Object, "Create a billing portal session"),
    op("stripe_get_prices_price", Get, "/v1/prices/{price}", PRICE_GET, Object, "Retrieve a price"),
    op("stripe_post_prices_price", Post, "/v1/prices/{price}", PRICE_UPDATE, Object, "Update a price"),
    op("stripe_get_customers_search", Get, "/v1/customers/search", CUSTOMER_SEARCH, Search, "Search customers"),
    op("stripe_get_customers_customer", Get, "/v1/customers/{customer}", CUSTOMER_GET, Object, "Retrieve a customer"),
    op("stripe_get_billing_portal_configurations", Get, "/v1/billing_portal/configurations", PORTAL_CONFIG_LIST, List, "List billing portal configurations"),
    op("stripe_post_billing_portal_configurations", Post, "/v1/billing_portal/configurations", PORTAL_CONFIG_CREATE, Object, "Create a billing portal configuration"),
];

/// 目录中一条声明 + 共享的 API 客户端
pub struct StripeOperation {
    spec: &'static OperationSpec,
    api: Arc<dyn StripeApi>,
    max_pages: usize,
}

impl StripeOperation {
    pub fn new(spec: &'static OperationSpec, api: Arc<dyn StripeApi>, max_pages: usize) -> Self {
        Self {
            spec,
            api,
            max_pages,
        }
    }
}

#[async_trait]
impl Operation for StripeOperation {
    fn id(&self) -> &str {
        self.spec.id
    }

    fn namespace(&self) -> &str {
        STRIPE_NAMESPACE
    }

    fn required_scope(&self) -> &str {
        STRIPE_SCOPE
    }

    fn description(&self) -> &str {
        self.spec.description
    }

    fn fields(&self) -> &'static [Field] {
        self.spec.fields
    }

    async fn invoke(&self, credential: &Credential, mut params: Params) -> Result<ActionOutput, ActionError> {
        let path = render_path(self.spec.path, &mut params)?;
        let request = ApiRequest {
            method: self.spec.method,
            path,
            params,
        };

        let output = match self.spec.response {
            ResponseKind::Object => ActionOutput::Object(self.api.send(credential, request).await?),
            ResponseKind::List => ActionOutput::List(
                drain(self.api.as_ref(), credential, request, Cursor::StartingAfter, self.max_pages).await?,
            ),
            ResponseKind::Search => ActionOutput::List(
                drain(self.api.as_ref(), credential, request, Cursor::NextPage, self.max_pages).await?,
            ),
        };
        Ok(output)
    }
}

/// 替换路径占位符；占位字段从请求体中移除
fn render_path(template: &str, params: &mut Params) -> Result<String, ActionError> {
    let mut rendered = Vec::new();
    for segment in template.split('/') {
        let placeholder = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}'));
        match placeholder {
            Some(name) => match params.take(name) {
                Some(ParamValue::String(value)) if is_safe_segment(&value) => rendered.push(value),
                Some(ParamValue::String(value)) => {
                    return Err(ActionError::ArgumentShapeInvalid(format!(
                        "`{name}` is not a valid identifier: {value:?}"
                    )))
                }
                _ => {
                    return Err(ActionError::ArgumentShapeInvalid(format!(
                        "missing required field `{name}`"
                    )))
                }
            },
            None => rendered.push(segment.to_string()),
        }
    }
    Ok(rendered.join("/"))
}

fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// 由目录构建完整的 Stripe 注册表
pub fn stripe_registry(api: Arc<dyn StripeApi>, max_pages: usize) -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    for spec in STRIPE_OPERATIONS {
        registry.register(StripeOperation::new(spec, api.clone(), max_pages));
    }
    registry
}
