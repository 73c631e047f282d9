//! Procedural macros for AL-Commons.
//!
//! `#[global_callback(L)]` and `#[object_callback(L)]` weave callback dispatch
//! around a function body. `#[on_class_load]`, `#[on_class_unload]` and
//! `#[scheduled(..)]` are passthrough markers read by the script compiler from
//! source; they let script files build with cargo too.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::spanned::Spanned;
use syn::{FnArg, ItemFn, Pat, Path, ReturnType, Type, parse_macro_input};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    Global,
    Object,
}

impl Scope {
    fn attr_name(self) -> &'static str {
        match self {
            Scope::Global => "global_callback",
            Scope::Object => "object_callback",
        }
    }
}

/// Dispatch the global callbacks of listener `L` around this function.
///
/// Free functions and associated functions without a receiver dispatch with
/// the enclosing module as declaring class; methods taking `&self` pass the
/// instance as receiver.
///
/// ```rust,ignore
/// use al_commons::callbacks::{Listener, global_callback};
///
/// pub struct QuestAccepted;
///
/// impl Listener for QuestAccepted {
///     const NAME: &'static str = "quest.QuestAccepted";
/// }
///
/// #[global_callback(QuestAccepted)]
/// pub fn accept_quest(player_id: u32, quest_id: u32) -> bool {
///     player_id != 0 && quest_id != 0
/// }
/// ```
///
/// When a before-callback blocks the caller the body is skipped and the
/// function returns [`BlockedReturn::blocked`]; the return type must
/// implement that trait. Arguments are borrowed again for the after-chain, so
/// the body must not move them out.
///
/// [`BlockedReturn::blocked`]: ../al_commons/callbacks/enhancer/trait.BlockedReturn.html
#[proc_macro_attribute]
pub fn global_callback(attr: TokenStream, item: TokenStream) -> TokenStream {
    let listener = parse_macro_input!(attr as Path);
    let input = parse_macro_input!(item as ItemFn);
    weave(Scope::Global, listener, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Dispatch the callbacks registered on `self` for listener `L` around this
/// method. `Self` must implement `EnhancedObject`.
#[proc_macro_attribute]
pub fn object_callback(attr: TokenStream, item: TokenStream) -> TokenStream {
    let listener = parse_macro_input!(attr as Path);
    let input = parse_macro_input!(item as ItemFn);
    weave(Scope::Object, listener, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Marks a zero-argument function to run after its script class is loaded.
#[proc_macro_attribute]
pub fn on_class_load(_attr: TokenStream, item: TokenStream) -> TokenStream {
    item
}

/// Marks a zero-argument function to run before its script class is unloaded.
#[proc_macro_attribute]
pub fn on_class_unload(_attr: TokenStream, item: TokenStream) -> TokenStream {
    item
}

/// Marks a zero-argument function as a cron-scheduled task.
///
/// ```rust,ignore
/// #[scheduled("0 0 * * * ?", long_running_task = true)]
/// pub fn hourly_cleanup() { }
/// ```
#[proc_macro_attribute]
pub fn scheduled(_attr: TokenStream, item: TokenStream) -> TokenStream {
    item
}

enum ReceiverKind {
    None,
    Ref,
}

fn weave(scope: Scope, listener: Path, input: ItemFn) -> syn::Result<TokenStream2> {
    let sig = &input.sig;
    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new(
            asyncness.span(),
            format!("#[{}] cannot be applied to async functions", scope.attr_name()),
        ));
    }

    let mut receiver = ReceiverKind::None;
    let mut arg_idents = Vec::new();
    for arg in &sig.inputs {
        match arg {
            FnArg::Receiver(recv) => {
                if recv.reference.is_none() {
                    return Err(syn::Error::new(
                        recv.span(),
                        "callback receivers must be `&self` or `&mut self`",
                    ));
                }
                receiver = ReceiverKind::Ref;
            }
            FnArg::Typed(typed) => match typed.pat.as_ref() {
                Pat::Ident(ident) => arg_idents.push(ident.ident.clone()),
                other => {
                    return Err(syn::Error::new(
                        other.span(),
                        "callback arguments must be plain identifiers",
                    ));
                }
            },
        }
    }

    let ret_ty: Type = match &sig.output {
        ReturnType::Default => syn::parse_quote!(()),
        ReturnType::Type(_, ty) => {
            if let Type::ImplTrait(_) = ty.as_ref() {
                return Err(syn::Error::new(
                    ty.span(),
                    "callback functions cannot return `impl Trait`",
                ));
            }
            ty.as_ref().clone()
        }
    };

    let (declaring, is_static, dispatch) = match (scope, receiver) {
        (Scope::Global, ReceiverKind::None) => (
            quote!(::core::module_path!()),
            true,
            quote!(::al_commons::callbacks::enhancer::Dispatch::global(
                ::al_commons::callbacks::Receiver::Class(::core::module_path!())
            )),
        ),
        (Scope::Global, ReceiverKind::Ref) => (
            quote!(::core::any::type_name::<Self>()),
            false,
            quote!(::al_commons::callbacks::enhancer::Dispatch::global(
                ::al_commons::callbacks::Receiver::Object(&*self)
            )),
        ),
        (Scope::Object, ReceiverKind::Ref) => (
            quote!(::core::any::type_name::<Self>()),
            false,
            quote!(::al_commons::callbacks::enhancer::Dispatch::object(&*self)),
        ),
        (Scope::Object, ReceiverKind::None) => {
            return Err(syn::Error::new(
                Span::call_site(),
                "#[object_callback] requires a `&self` receiver",
            ));
        }
    };

    let attrs = &input.attrs;
    let vis = &input.vis;
    let block = &input.block;
    let args = quote! {
        let __al_args: &[&dyn ::core::any::Any] = &[#(&#arg_idents),*];
    };

    Ok(quote! {
        #(#attrs)*
        #vis #sig {
            static __AL_CALLBACK_SITE: ::al_commons::callbacks::enhancer::CallSite =
                ::al_commons::callbacks::enhancer::CallSite::new();
            let __al_listener =
                __AL_CALLBACK_SITE.listener::<#listener>(#declaring, #is_static);
            let __al_before = {
                #args
                #dispatch.before(__al_listener, __al_args)
            };
            if __al_before.is_blocking_caller() {
                return <#ret_ty as ::al_commons::callbacks::enhancer::BlockedReturn>::blocked(
                    __al_before,
                );
            }
            #[allow(clippy::redundant_closure_call)]
            let __al_ret: #ret_ty = (|| -> #ret_ty { #block })();
            #args
            #dispatch.complete(__al_listener, __al_args, __al_before, __al_ret)
        }
    })
}
