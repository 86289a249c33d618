//! Procedural macros for stepchain
//!
//! This crate provides the `#[stepchain::test]` attribute macro for writing
//! step-aware tests without wiring a harness by hand.
//!
//! # Example
//!
//! ```rust,ignore
//! use stepchain::prelude::*;
//!
//! #[stepchain::test]
//! fn my_test(cx: &StepContext) -> stepchain::Result<()> {
//!     cx.wait_until(|_| server_ready())?;
//!     cx.and_then(|_| assert!(server_ready()))?;
//!     Ok(())
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, Ident, ItemFn, Lit, Token,
};

/// Configuration options for the test macro.
#[derive(Default)]
struct TestConfig {
    /// Watchdog deadline in milliseconds (default: 2000)
    timeout_ms: Option<u64>,
    /// Poll interval for waiting predicates in milliseconds (default: 100)
    poll_interval_ms: Option<u64>,
    /// Whether to start tokio's clock paused (default: false)
    paused: bool,
    /// Whether the body takes a Completion handle (default: false)
    callback: bool,
}

impl Parse for TestConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = TestConfig::default();

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match ident.to_string().as_str() {
                "timeout_ms" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Int(i) = lit {
                        config.timeout_ms = Some(i.base10_parse()?);
                    }
                }
                "poll_interval_ms" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Int(i) = lit {
                        config.poll_interval_ms = Some(i.base10_parse()?);
                    }
                }
                "paused" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Bool(b) = lit {
                        config.paused = b.value();
                    }
                }
                "callback" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Bool(b) = lit {
                        config.callback = b.value();
                    }
                }
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {ident}"),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(config)
    }
}

/// Test attribute macro for step-aware tests.
///
/// The annotated function is a synchronous test body: it receives a
/// `&StepContext`, schedules steps through it, and returns
/// `stepchain::Result<()>`. The macro wraps it in a tokio test that runs
/// the body through a `StepHarness` and panics with the failing step's
/// diagnostic if the test does not pass.
///
/// # Basic Usage
///
/// ```rust,ignore
/// use stepchain::prelude::*;
///
/// #[stepchain::test]
/// fn test_queue_drains(cx: &StepContext) -> stepchain::Result<()> {
///     cx.wait_until(|_| queue_len() == 0)?;
///     Ok(())
/// }
/// ```
///
/// # Callback-style bodies
///
/// With `callback = true` the body also receives a `Completion` handle
/// that settles the test explicitly, overriding the chain:
///
/// ```rust,ignore
/// #[stepchain::test(callback = true)]
/// fn test_fires_exactly_once(cx: &StepContext, done: Completion) -> stepchain::Result<()> {
///     subscribe(move || done.complete());
///     Ok(())
/// }
/// ```
///
/// # Configuration Options
///
/// - `timeout_ms = 500` - Watchdog deadline in milliseconds (default: 2000)
/// - `poll_interval_ms = 10` - Predicate re-evaluation interval (default: 100)
/// - `paused = true` - Start tokio's clock paused, so waits are instant
/// - `callback = true` - The body takes a `Completion` handle
///
/// ```rust,ignore
/// #[stepchain::test(timeout_ms = 500, paused = true)]
/// fn test_fast_failure(cx: &StepContext) -> stepchain::Result<()> {
///     cx.wait_until(|_| false)?; // times out after 500 virtual ms
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as TestConfig);
    let input = parse_macro_input!(item as ItemFn);

    expand_test(config, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_test(config: TestConfig, input: ItemFn) -> syn::Result<TokenStream2> {
    let name = &input.sig.ident;
    let attrs = &input.attrs;
    let vis = &input.vis;

    // The async work happens in the steps the body schedules, not in the
    // body itself.
    if input.sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "test body must not be async; schedule steps through the context instead",
        ));
    }

    let expected_args = if config.callback { 2 } else { 1 };
    if input.sig.inputs.len() != expected_args {
        let hint = if config.callback {
            "callback test bodies take (cx: &StepContext, done: Completion)"
        } else {
            "test bodies take (cx: &StepContext)"
        };
        return Err(syn::Error::new_spanned(&input.sig.inputs, hint));
    }

    let tokio_attr = if config.paused {
        quote! { #[::tokio::test(start_paused = true)] }
    } else {
        quote! { #[::tokio::test] }
    };

    let mut config_expr = quote! { ::stepchain::ContextConfig::new() };
    if let Some(ms) = config.timeout_ms {
        config_expr = quote! {
            #config_expr.timeout(::std::time::Duration::from_millis(#ms))
        };
    }
    if let Some(ms) = config.poll_interval_ms {
        config_expr = quote! {
            #config_expr.poll_interval(::std::time::Duration::from_millis(#ms))
        };
    }

    let body_ctor = if config.callback {
        quote! { ::stepchain::TestBody::with_completion(#name) }
    } else {
        quote! { ::stepchain::TestBody::simple(#name) }
    };

    // The user's function moves inside the generated test, with outer
    // attributes (#[ignore], #[should_panic], docs) staying on the outside.
    let mut body_fn = input.clone();
    body_fn.attrs.clear();
    body_fn.vis = syn::Visibility::Inherited;

    Ok(quote! {
        #tokio_attr
        #(#attrs)*
        #vis async fn #name() {
            #body_fn

            let harness = ::stepchain::StepHarness::with_config(#config_expr);
            harness.run_test(#body_ctor).await.assert_passed();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::TestConfig;

    #[::core::prelude::v1::test]
    fn test_config_parse_empty() {
        let config: TestConfig = syn::parse_str("").unwrap();
        assert!(config.timeout_ms.is_none());
        assert!(config.poll_interval_ms.is_none());
        assert!(!config.paused);
        assert!(!config.callback);
    }

    #[::core::prelude::v1::test]
    fn test_config_parse_timeout() {
        let config: TestConfig = syn::parse_str("timeout_ms = 500").unwrap();
        assert_eq!(config.timeout_ms, Some(500));
    }

    #[::core::prelude::v1::test]
    fn test_config_parse_multiple() {
        let config: TestConfig =
            syn::parse_str("timeout_ms = 250, poll_interval_ms = 10, paused = true").unwrap();
        assert_eq!(config.timeout_ms, Some(250));
        assert_eq!(config.poll_interval_ms, Some(10));
        assert!(config.paused);
    }

    #[::core::prelude::v1::test]
    fn test_config_parse_callback() {
        let config: TestConfig = syn::parse_str("callback = true").unwrap();
        assert!(config.callback);
    }

    #[::core::prelude::v1::test]
    fn test_config_rejects_unknown_options() {
        assert!(syn::parse_str::<TestConfig>("flavor = \"multi_thread\"").is_err());
    }
}
