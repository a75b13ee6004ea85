use proc_macro::TokenStream;

mod interceptable;

/// Makes a trait decoratable.
///
/// Generates a `{Trait}Proxy` struct that implements the trait by routing
/// every method through the interception pipeline, and implements
/// `callweave::interceptor::Interceptable` for `dyn Trait`. Methods may carry
/// interface-level declarations with `#[intercept(Interceptor)]` or
/// `#[intercept(Interceptor, settings)]`.
///
/// Every method must take `&self` and return a `Result`; arguments must be
/// `Clone + Serialize + Sync`. Arguments of type `CancellationToken` are
/// forwarded but never hashed or logged.
///
/// # Example
/// ```ignore
/// #[interceptable]
/// pub trait UserService: Send + Sync {
///     #[intercept(CacheInterceptor, CacheSettings::keyed("user").timeout_secs(300))]
///     async fn get_user(&self, id: u64) -> Result<User, UserError>;
///
///     fn rename(&self, id: u64, name: String) -> Result<(), UserError>;
/// }
/// ```
#[proc_macro_attribute]
pub fn interceptable(attr: TokenStream, item: TokenStream) -> TokenStream {
    interceptable::interceptable_attribute(attr, item)
}
