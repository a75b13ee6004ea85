use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    Expr, FnArg, GenericArgument, Ident, ItemTrait, Pat, Path, PathArguments, ReturnType,
    Signature, Token, TraitItem, TraitItemFn, Type,
    parse::{Parse, ParseStream},
    parse_macro_input,
    spanned::Spanned,
};

/// `#[intercept(Interceptor)]` or `#[intercept(Interceptor, settings)]`
struct InterceptArgs {
    interceptor: Path,
    settings: Option<Expr>,
}

impl Parse for InterceptArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let interceptor: Path = input.parse()?;
        let mut settings = None;
        if input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
            if !input.is_empty() {
                settings = Some(input.parse()?);
            }
        }
        if !input.is_empty() {
            return Err(input.error("expected `Interceptor` or `Interceptor, settings`"));
        }
        Ok(InterceptArgs {
            interceptor,
            settings,
        })
    }
}

enum Shape {
    Sync,
    AsyncUnit,
    AsyncValue,
}

struct Method {
    sig: Signature,
    inputs: Vec<(Ident, Type)>,
    shape: Shape,
    declarations: Vec<InterceptArgs>,
}

pub fn interceptable_attribute(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        let attr = TokenStream2::from(attr);
        return syn::Error::new(attr.span(), "#[interceptable] takes no arguments")
            .to_compile_error()
            .into();
    }

    let mut input = parse_macro_input!(item as ItemTrait);
    match expand(&mut input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: &mut ItemTrait) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "#[interceptable] traits cannot be generic",
        ));
    }

    let mut methods = Vec::new();
    for item in &mut input.items {
        if let TraitItem::Fn(method) = item {
            methods.push(parse_method(method)?);
        }
    }

    let trait_ident = &input.ident;
    let vis = &input.vis;
    let proxy_ident = format_ident!("{}Proxy", trait_ident);
    let interface_name = trait_ident.to_string();

    let has_async = methods
        .iter()
        .any(|method| !matches!(method.shape, Shape::Sync));
    let async_attr = if has_async {
        quote! { #[::callweave::async_trait] }
    } else {
        quote! {}
    };

    let proxy_methods = methods.iter().map(proxy_method);
    let method_names = methods.iter().map(|method| method.sig.ident.to_string());
    let declarations = methods.iter().flat_map(|method| {
        let name = method.sig.ident.to_string();
        method.declarations.iter().map(move |declaration| {
            let interceptor = &declaration.interceptor;
            match &declaration.settings {
                Some(settings) => quote! {
                    (#name, ::callweave::interceptor::Declaration::with::<#interceptor, _>(#settings))
                },
                None => quote! {
                    (#name, ::callweave::interceptor::Declaration::of::<#interceptor>())
                },
            }
        })
    });

    let proxy_doc = format!("Intercepting proxy for `dyn {}`", interface_name);

    Ok(quote! {
        #async_attr
        #input

        #[doc = #proxy_doc]
        #vis struct #proxy_ident {
            target: ::std::sync::Arc<dyn #trait_ident>,
            invoker: ::callweave::interceptor::Invoker,
        }

        #async_attr
        impl #trait_ident for #proxy_ident {
            #(#proxy_methods)*
        }

        impl ::callweave::interceptor::Interceptable for dyn #trait_ident {
            fn interface_name() -> &'static str {
                #interface_name
            }

            fn methods() -> &'static [&'static str] {
                &[#(#method_names),*]
            }

            fn declarations() -> ::std::vec::Vec<(&'static str, ::callweave::interceptor::Declaration)> {
                ::std::vec![#(#declarations),*]
            }

            fn create_proxy(
                target: ::std::sync::Arc<Self>,
                invoker: ::callweave::interceptor::Invoker,
            ) -> ::std::sync::Arc<Self> {
                ::std::sync::Arc::new(#proxy_ident { target, invoker })
            }
        }
    })
}

fn parse_method(method: &mut TraitItemFn) -> syn::Result<Method> {
    let mut declarations = Vec::new();
    let mut kept = Vec::with_capacity(method.attrs.len());
    for attr in method.attrs.drain(..) {
        if attr.path().is_ident("intercept") {
            declarations.push(attr.parse_args::<InterceptArgs>()?);
        } else {
            kept.push(attr);
        }
    }
    method.attrs = kept;

    let sig = &method.sig;
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            sig.generics.span(),
            "interceptable methods cannot be generic",
        ));
    }

    let mut args = sig.inputs.iter();
    match args.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new(
                sig.span(),
                "interceptable methods must take `&self`",
            ));
        }
    }

    let mut inputs = Vec::new();
    for arg in args {
        let FnArg::Typed(typed) = arg else {
            return Err(syn::Error::new(arg.span(), "unexpected receiver"));
        };
        let Pat::Ident(pat) = typed.pat.as_ref() else {
            return Err(syn::Error::new(
                typed.pat.span(),
                "interceptable method arguments must be plain identifiers",
            ));
        };
        inputs.push((pat.ident.clone(), typed.ty.as_ref().clone()));
    }

    let ReturnType::Type(_, output) = &sig.output else {
        return Err(syn::Error::new(
            sig.span(),
            "interceptable methods must return a `Result`",
        ));
    };

    let shape = match (sig.asyncness.is_some(), is_unit_result(output)) {
        (false, _) => Shape::Sync,
        (true, true) => Shape::AsyncUnit,
        (true, false) => Shape::AsyncValue,
    };

    Ok(Method {
        sig: sig.clone(),
        inputs,
        shape,
        declarations,
    })
}

fn proxy_method(method: &Method) -> TokenStream2 {
    let sig = &method.sig;
    let ident = &sig.ident;
    let name = ident.to_string();

    let captures = method.inputs.iter().map(|(arg, ty)| {
        let arg_name = arg.to_string();
        if is_token(ty) {
            quote! { __callweave_arguments.token(#arg_name); }
        } else {
            quote! { __callweave_arguments.push(#arg_name, &#arg); }
        }
    });
    let forwarded = method
        .inputs
        .iter()
        .map(|(arg, _)| quote! { ::core::clone::Clone::clone(&#arg) });

    let arguments = quote! {
        || {
            #[allow(unused_mut)]
            let mut __callweave_arguments = ::callweave::interceptor::Arguments::new();
            #(#captures)*
            __callweave_arguments
        }
    };
    let target = quote! {
        || __callweave_target.#ident(#(#forwarded),*)
    };

    let body = match method.shape {
        Shape::Sync => quote! {
            self.invoker.invoke_blocking(#name, #arguments, #target)
        },
        Shape::AsyncValue => quote! {
            self.invoker.invoke_async(#name, #arguments, #target).await
        },
        Shape::AsyncUnit => quote! {
            self.invoker.invoke_async_unit(#name, #arguments, #target)?.await
        },
    };

    quote! {
        #sig {
            let __callweave_target = &self.target;
            #body
        }
    }
}

/// `Result<(), E>` or an alias such as `Result<()>`
fn is_unit_result(ty: &Type) -> bool {
    let Type::Path(path) = ty else {
        return false;
    };
    let Some(segment) = path.path.segments.last() else {
        return false;
    };
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return false;
    };
    matches!(
        args.args.first(),
        Some(GenericArgument::Type(Type::Tuple(tuple))) if tuple.elems.is_empty()
    )
}

fn is_token(ty: &Type) -> bool {
    let ty = match ty {
        Type::Reference(reference) => reference.elem.as_ref(),
        other => other,
    };
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "CancellationToken"),
        _ => false,
    }
}
