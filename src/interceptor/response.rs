use super::{Call, Interceptor, InterceptorResult};
use crate::context::CallerContext;
use crate::error::CallweaveError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::sync::Arc;

/// Declarative rule for one property of a returned data object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldRule {
    name: String,
    mask: bool,
    remove: bool,
    roles: Vec<String>,
    filterable: bool,
    pinned: bool,
    precision: Option<u32>,
    display_name: Option<String>,
    tooltip: Option<String>,
    format: Option<String>,
    reset: Option<Value>,
}

impl FieldRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Partially stars out string values
    pub fn mask(mut self) -> Self {
        self.mask = true;
        self
    }

    /// Resets the value to its type's default and hides the field
    pub fn remove(mut self) -> Self {
        self.remove = true;
        self
    }

    /// Value a removed or hidden field is reset to, overriding
    /// [`Returnable::field_defaults`](super::Returnable::field_defaults)
    pub fn reset_to<V: Serialize>(mut self, value: V) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => self.reset = Some(value),
            Err(e) => tracing::warn!("Ignoring unserializable reset value of {}: {}", self.name, e),
        }
        self
    }

    /// Restricts visibility to callers holding at least one of `roles`
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Rounds numeric values to `digits` decimals
    pub fn precision(mut self, digits: u32) -> Self {
        self.precision = Some(digits);
        self
    }

    /// Localization key of the display name
    pub fn display_name(mut self, key: impl Into<String>) -> Self {
        self.display_name = Some(key.into());
        self
    }

    /// Localization key of the tooltip
    pub fn tooltip(mut self, key: impl Into<String>) -> Self {
        self.tooltip = Some(key.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn visible_to(&self, caller: Option<&CallerContext>) -> bool {
        if self.remove {
            return false;
        }
        if self.roles.is_empty() {
            return true;
        }
        caller.is_some_and(|caller| self.roles.iter().any(|role| caller.has_role(role)))
    }
}

/// Display metadata of a visible field, attached to the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Resolves localization keys to display strings
pub trait Localizer: Send + Sync + 'static {
    fn localize(&self, key: &str) -> String;
}

/// Returns every key unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLocalizer;

impl Localizer for NoopLocalizer {
    fn localize(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Post-processes return values according to their [`FieldRule`]s.
///
/// Runs the rest of the chain first, then redacts the returned object (or
/// every object of a returned list) in place: hidden and removed fields are
/// reset to their default, masked strings are starred, numbers are rounded.
/// The visible fields are described by [`FieldMeta`] entries handed to the
/// return value.
pub struct ResponseInterceptor {
    localizer: Arc<dyn Localizer>,
    order: i32,
}

impl ResponseInterceptor {
    pub const DEFAULT_ORDER: i32 = -20;

    pub fn new(localizer: Arc<dyn Localizer>) -> Self {
        Self {
            localizer,
            order: Self::DEFAULT_ORDER,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl Default for ResponseInterceptor {
    fn default() -> Self {
        Self::new(Arc::new(NoopLocalizer))
    }
}

/// How a hidden field with no known default is cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unknown {
    /// Drop the key, letting `Option` and `#[serde(default)]` fields decode
    Omit,
    /// Replace the value with the blank of its JSON type
    Blank,
}

#[async_trait]
impl Interceptor for ResponseInterceptor {
    fn order(&self) -> i32 {
        self.order
    }

    async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
        call.next().await?;

        let rules = call.return_type().field_rules();
        if rules.is_empty() {
            return Ok(());
        }
        let Some(encoded) = call.return_json() else {
            return Ok(());
        };

        let encoded = encoded?;
        let return_type = *call.return_type();
        let defaults = return_type.field_defaults();

        let mut failure = None;
        for unknown in [Unknown::Omit, Unknown::Blank] {
            let mut value = encoded.clone();
            let Some(root) = return_type.shape_root(&mut value) else {
                return Ok(());
            };
            shape_with(root, &rules, defaults.as_ref(), call.caller(), unknown);

            match call.set_return_json(value) {
                Ok(()) => {
                    tracing::debug!("Shaped response of {}", call.method());
                    let fields = describe(&rules, call.caller(), self.localizer.as_ref());
                    call.attach_fields(fields);
                    return Ok(());
                }
                Err(e) => failure = Some(e),
            }
        }

        tracing::warn!(
            "Hidden fields of {} have no usable default; provide field_defaults or FieldRule::reset_to",
            return_type.name()
        );
        Err(CallweaveError::Shaping {
            type_name: return_type.name(),
            reason: failure.map(|e| e.to_string()).unwrap_or_default(),
        }
        .into())
    }
}

/// Applies `rules` to an object, or to each object of an array.
///
/// Removed and hidden fields take their value from the rule's reset value,
/// then from `defaults` (the serialized default object); failing both they
/// are blanked by JSON type. Only the located value itself is shaped, nested
/// objects are left alone.
pub fn shape(
    value: &mut Value,
    rules: &[FieldRule],
    defaults: Option<&Value>,
    caller: Option<&CallerContext>,
) {
    shape_with(value, rules, defaults, caller, Unknown::Blank)
}

fn shape_with(
    value: &mut Value,
    rules: &[FieldRule],
    defaults: Option<&Value>,
    caller: Option<&CallerContext>,
    unknown: Unknown,
) {
    match value {
        Value::Array(items) => {
            for item in items {
                shape_with(item, rules, defaults, caller, unknown);
            }
        }
        Value::Object(object) => shape_object(object, rules, defaults, caller, unknown),
        _ => {}
    }
}

fn shape_object(
    object: &mut Map<String, Value>,
    rules: &[FieldRule],
    defaults: Option<&Value>,
    caller: Option<&CallerContext>,
    unknown: Unknown,
) {
    for rule in rules {
        if !rule.visible_to(caller) {
            hide(object, rule, defaults, unknown);
            continue;
        }

        let Some(field) = object.get_mut(&rule.name) else {
            continue;
        };
        if rule.mask {
            if let Value::String(text) = field {
                *text = mask(text);
            }
        }
        if let Some(digits) = rule.precision {
            round(field, digits);
        }
    }
}

fn hide(object: &mut Map<String, Value>, rule: &FieldRule, defaults: Option<&Value>, unknown: Unknown) {
    if !object.contains_key(&rule.name) {
        return;
    }

    let known = rule
        .reset
        .as_ref()
        .or_else(|| defaults.and_then(|defaults| defaults.get(rule.name.as_str())));
    match (known, unknown) {
        (Some(reset), _) => {
            object.insert(rule.name.clone(), reset.clone());
        }
        (None, Unknown::Omit) => {
            object.remove(&rule.name);
        }
        (None, Unknown::Blank) => {
            if let Some(field) = object.get_mut(&rule.name) {
                *field = blank(field);
            }
        }
    }
}

/// Metadata of the fields `caller` may see
pub fn describe(
    rules: &[FieldRule],
    caller: Option<&CallerContext>,
    localizer: &dyn Localizer,
) -> Vec<FieldMeta> {
    rules
        .iter()
        .filter(|rule| rule.visible_to(caller))
        .map(|rule| FieldMeta {
            name: rule.name.clone(),
            display_name: localizer.localize(rule.display_name.as_deref().unwrap_or(&rule.name)),
            tooltip: rule.tooltip.as_deref().map(|key| localizer.localize(key)),
            filterable: rule.filterable,
            pinned: rule.pinned,
            precision: rule.precision,
            format: rule.format.clone(),
        })
        .collect()
}

/// Stars out the middle of `text`, keeping the first and last quarter
/// (rounded up) of its characters.
///
/// Strings too short to have a middle are returned unchanged.
pub fn mask(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let keep = len.div_ceil(4);
    if keep * 2 >= len {
        return text.to_string();
    }

    let mut masked = String::with_capacity(text.len());
    masked.extend(&chars[..keep]);
    masked.extend(std::iter::repeat_n('*', len - keep * 2));
    masked.extend(&chars[len - keep..]);
    masked
}

fn blank(value: &Value) -> Value {
    match value {
        Value::String(_) => Value::String(String::new()),
        Value::Number(number) if number.is_f64() => Value::from(0.0),
        Value::Number(_) => Value::from(0),
        Value::Bool(_) => Value::Bool(false),
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(_) | Value::Null => Value::Null,
    }
}

fn round(value: &mut Value, digits: u32) {
    let Value::Number(number) = value else {
        return;
    };
    if !number.is_f64() {
        return;
    }
    let Some(raw) = number.as_f64() else {
        return;
    };

    // f64 carries no more than 15 significant decimals
    let factor = 10f64.powi(digits.min(f64::DIGITS) as i32);
    if let Some(rounded) = Number::from_f64((raw * factor).round() / factor) {
        *number = rounded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ApiResponse;
    use crate::error::CallweaveError;
    use crate::interceptor::{Arguments, Invoker, MethodChain, Returnable, defaults_of};
    use crate::worker::WorkerPool;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: u64,
        email: String,
        iban: String,
        balance: f64,
        internal: bool,
    }

    impl Returnable for Account {
        fn field_rules() -> Vec<FieldRule> {
            account_rules()
        }
    }

    fn account_rules() -> Vec<FieldRule> {
        vec![
            FieldRule::new("email").mask().filterable(),
            FieldRule::new("iban").roles(["finance"]),
            FieldRule::new("balance").precision(2).display_name("account.balance"),
            FieldRule::new("internal").remove(),
        ]
    }

    fn account() -> Account {
        Account {
            id: 1,
            email: "ann@example.com".into(),
            iban: "DE001234".into(),
            balance: 10.4567,
            internal: true,
        }
    }

    struct Upper;

    impl Localizer for Upper {
        fn localize(&self, key: &str) -> String {
            key.to_uppercase()
        }
    }

    fn invoker() -> Invoker {
        let chain = MethodChain::new(
            vec![Arc::new(ResponseInterceptor::new(Arc::new(Upper)))],
            Arc::from(Vec::new()),
        );
        let methods = ["load", "list", "wrapped", "paged", "profile", "badge", "plain"];
        Invoker::new(
            "tests::Accounts",
            methods.into_iter().map(|name| (name, chain.clone())).collect(),
            WorkerPool::new(1).unwrap(),
        )
    }

    #[test]
    fn test_mask_keeps_quarters() {
        assert_eq!(mask("abcdefgh"), "ab****gh");
        assert_eq!(mask("abcde"), "ab*de");
        assert_eq!(mask("abcd"), "a**d");
        assert_eq!(mask("ab"), "ab");
        assert_eq!(mask(""), "");
        assert_eq!(mask("äöüßäöüß"), "äö****üß");

        for len in 3..40 {
            let text: String = "x".repeat(len);
            let masked = mask(&text);
            let keep = len.div_ceil(4);
            assert_eq!(masked.chars().count(), len);
            assert_eq!(masked.chars().filter(|c| *c == '*').count(), len - 2 * keep);
        }
    }

    #[test]
    fn test_shape_list_of_objects() {
        let mut value = json!([
            {"email": "ann@example.com", "iban": "DE1", "internal": true, "balance": 1.005},
            {"email": "bob@example.com", "iban": "DE2", "internal": false, "balance": 2}
        ]);

        shape(&mut value, &account_rules(), None, None);

        assert_eq!(value[0]["email"], json!("ann@*******.com"));
        assert_eq!(value[0]["iban"], json!(""));
        assert_eq!(value[0]["internal"], json!(false));
        assert_eq!(value[1]["balance"], json!(2));
    }

    #[test]
    fn test_describe_visible_fields() {
        let admin = CallerContext::new().with_role("finance");
        let fields = describe(&account_rules(), Some(&admin), &Upper);

        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["email", "iban", "balance"]);
        assert_eq!(fields[2].display_name, "ACCOUNT.BALANCE");
        assert_eq!(fields[2].precision, Some(2));
        assert!(fields[0].filterable);

        let anonymous = describe(&account_rules(), None, &NoopLocalizer);
        assert_eq!(anonymous.len(), 2);
    }

    #[tokio::test]
    async fn test_interceptor_redacts_single_object() {
        let invoker = invoker();
        let value: Result<Account, CallweaveError> = invoker
            .invoke_async("load", Arguments::new, || async { Ok(account()) })
            .await;

        let value = value.unwrap();
        assert_eq!(value.email, "ann@*******.com");
        assert_eq!(value.iban, "");
        assert_eq!(value.balance, 10.46);
        assert!(!value.internal);
    }

    #[tokio::test]
    async fn test_interceptor_respects_caller_roles() {
        let invoker = invoker();
        let value: Result<Vec<Account>, CallweaveError> = CallerContext::new()
            .with_role("finance")
            .scope(invoker.invoke_async("list", Arguments::new, || async {
                Ok(vec![account(), account()])
            }))
            .await;

        let value = value.unwrap();
        assert_eq!(value.len(), 2);
        assert!(value.iter().all(|a| a.iban == "DE001234"));
        assert!(value.iter().all(|a| a.email == "ann@*******.com"));
    }

    #[tokio::test]
    async fn test_interceptor_attaches_field_metadata() {
        let invoker = invoker();
        let value: Result<ApiResponse<Account>, CallweaveError> = invoker
            .invoke_async("wrapped", Arguments::new, || async { Ok(ApiResponse::ok(account())) })
            .await;

        let response = value.unwrap();
        let data = response.data.as_ref().unwrap();
        assert_eq!(data.email, "ann@*******.com");
        let names: Vec<_> = response.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["email", "balance"]);
        assert_eq!(response.fields[0].display_name, "EMAIL");
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    enum Tier {
        Gold,
        #[default]
        Basic,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Address {
        city: String,
        zip: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        tier: Tier,
        address: Address,
        nickname: Option<String>,
        initial: char,
    }

    impl Returnable for Profile {
        fn field_rules() -> Vec<FieldRule> {
            vec![
                FieldRule::new("tier").remove(),
                FieldRule::new("address").roles(["admin"]),
                FieldRule::new("nickname").remove(),
                FieldRule::new("initial").remove(),
            ]
        }

        fn field_defaults() -> Option<Value> {
            defaults_of::<Self>()
        }
    }

    fn profile() -> Profile {
        Profile {
            id: 1,
            tier: Tier::Gold,
            address: Address {
                city: "Oslo".into(),
                zip: 150,
            },
            nickname: Some("ann".into()),
            initial: 'A',
        }
    }

    #[tokio::test]
    async fn test_hidden_fields_reset_to_type_defaults() {
        let invoker = invoker();
        let value: Result<Profile, CallweaveError> = invoker
            .invoke_async("profile", Arguments::new, || async { Ok(profile()) })
            .await;

        let value = value.unwrap();
        assert_eq!(value.id, 1);
        assert_eq!(value.tier, Tier::Basic);
        assert_eq!(value.address, Address::default());
        assert_eq!(value.nickname, None);
        assert_eq!(value.initial, '\0');
    }

    #[tokio::test]
    async fn test_role_holder_keeps_nested_struct() {
        let invoker = invoker();
        let value: Result<Profile, CallweaveError> = CallerContext::new()
            .with_role("admin")
            .scope(invoker.invoke_async("profile", Arguments::new, || async { Ok(profile()) }))
            .await;

        assert_eq!(value.unwrap().address, profile().address);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Badge {
        id: u64,
        tier: Tier,
        nickname: Option<String>,
    }

    impl Returnable for Badge {
        fn field_rules() -> Vec<FieldRule> {
            vec![
                FieldRule::new("tier").remove().reset_to(Tier::Basic),
                FieldRule::new("nickname").remove(),
            ]
        }
    }

    #[tokio::test]
    async fn test_reset_value_and_missing_option_without_defaults() {
        let invoker = invoker();
        let value: Result<Badge, CallweaveError> = invoker
            .invoke_async("badge", Arguments::new, || async {
                Ok(Badge {
                    id: 2,
                    tier: Tier::Gold,
                    nickname: Some("ann".into()),
                })
            })
            .await;

        assert_eq!(
            value.unwrap(),
            Badge {
                id: 2,
                tier: Tier::Basic,
                nickname: None,
            }
        );
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Plain {
        tier: Tier,
    }

    impl Returnable for Plain {
        fn field_rules() -> Vec<FieldRule> {
            vec![FieldRule::new("tier").remove()]
        }
    }

    #[tokio::test]
    async fn test_unresettable_field_is_never_leaked() {
        let invoker = invoker();
        let value: Result<Plain, CallweaveError> = invoker
            .invoke_async("plain", Arguments::new, || async { Ok(Plain { tier: Tier::Gold }) })
            .await;

        assert!(matches!(value, Err(CallweaveError::Shaping { type_name, .. }) if type_name.ends_with("Plain")));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Page<T> {
        items: Vec<T>,
        total: u64,
    }

    impl<T: Returnable> Returnable for Page<T> {
        fn field_rules() -> Vec<FieldRule> {
            T::field_rules()
        }

        fn field_defaults() -> Option<Value> {
            T::field_defaults()
        }

        fn shape_root(value: &mut Value) -> Option<&mut Value> {
            value.get_mut("items")
        }
    }

    #[tokio::test]
    async fn test_paged_items_inside_envelope_are_shaped() {
        let invoker = invoker();
        let value: Result<ApiResponse<Page<Account>>, CallweaveError> = invoker
            .invoke_async("paged", Arguments::new, || async {
                Ok(ApiResponse::ok(Page {
                    items: vec![account(), account()],
                    total: 2,
                }))
            })
            .await;

        let page = value.unwrap().data.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|a| a.email == "ann@*******.com" && a.iban.is_empty()));
    }

    #[test]
    fn test_oversized_precision_is_clamped() {
        let mut value = json!({"balance": 1.25});
        shape(&mut value, &[FieldRule::new("balance").precision(u32::MAX)], None, None);
        assert_eq!(value["balance"], json!(1.25));

        let mut value = json!({"balance": 1.25});
        shape(&mut value, &[FieldRule::new("balance").precision(1)], None, None);
        assert_eq!(value["balance"].as_f64(), Some(1.3));
    }
}
