//! Script source scanning.
//!
//! Finds the marker attributes of a Rust script file, strips them, and
//! collects the functions the generated library has to export.

use proc_macro2::TokenStream;
use quote::ToTokens;
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, File, FnArg, Item, ItemFn, Lit, ReturnType, Token, Type, UseTree};

use crate::error::{Error, Result};
use crate::scripting::class::{self, Scheduled};

/// Owned argument types a script method can receive.
const PARAM_TYPES: &[&str] = &[
    "bool", "char", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "String",
];

/// How one argument of an exported method is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Param {
    /// Parsed into this owned type.
    Value(String),
    /// `&str`, parsed into a `String` and borrowed.
    Str,
}

/// A function exported as a static method.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScannedMethod {
    pub name: String,
    pub listener: Option<String>,
    pub params: Vec<Param>,
    pub returns: class::ReturnType,
}

/// A scanned script file.
#[derive(Debug, Default)]
pub(crate) struct ScannedScript {
    pub on_load: Vec<String>,
    pub on_unload: Vec<String>,
    /// Schedule and the function it runs.
    pub scheduled: Option<(Scheduled, String)>,
    pub methods: Vec<ScannedMethod>,
    /// Source with marker attributes and `al_commons` imports removed.
    pub code: String,
}

impl ScannedScript {
    /// Functions exported as zero-argument hooks.
    pub fn hooks(&self) -> Vec<&str> {
        let mut hooks: Vec<&str> = self
            .on_load
            .iter()
            .chain(&self.on_unload)
            .map(String::as_str)
            .chain(self.scheduled.iter().map(|(_, run)| run.as_str()))
            .collect();
        hooks.sort_unstable();
        hooks.dedup();
        hooks
    }
}

enum Marker {
    OnLoad,
    OnUnload,
    Scheduled(Scheduled),
    Callback(String),
}

/// Scan and rewrite one script source.
pub(crate) fn scan(class: &str, source: &str) -> Result<ScannedScript> {
    let file = syn::parse_file(source).map_err(|e| Error::Compilation {
        class: Some(class.to_string()),
        message: e.to_string(),
    })?;

    let mut scanned = ScannedScript::default();
    let mut items = Vec::with_capacity(file.items.len());

    for item in file.items {
        match item {
            Item::Use(ref item_use) if imports_commons(&item_use.tree) => {}
            Item::Fn(func) => items.push(Item::Fn(scan_fn(class, func, &mut scanned)?)),
            other => items.push(other),
        }
    }

    // Inner attributes of the file would be misplaced inside the wrapper module.
    let file = File {
        shebang: None,
        attrs: Vec::new(),
        items,
    };
    let tokens: TokenStream = file.into_token_stream();
    scanned.code = tokens.to_string();
    Ok(scanned)
}

fn scan_fn(class: &str, mut func: ItemFn, scanned: &mut ScannedScript) -> Result<ItemFn> {
    let mut markers = Vec::new();
    let mut kept = Vec::with_capacity(func.attrs.len());
    for attr in func.attrs {
        match marker(class, &attr)? {
            Some(marker) => markers.push(marker),
            None => kept.push(attr),
        }
    }
    func.attrs = kept;

    let name = func.sig.ident.to_string();
    let err = |message: String| Error::Compilation {
        class: Some(class.to_string()),
        message,
    };

    let is_public = matches!(func.vis, syn::Visibility::Public(_));
    if !markers.is_empty() {
        func.vis = syn::parse_quote!(pub);
    }

    let mut is_hook = false;
    let mut listener = None;
    for marker in markers {
        match marker {
            Marker::OnLoad => {
                scanned.on_load.push(name.clone());
                is_hook = true;
            }
            Marker::OnUnload => {
                scanned.on_unload.push(name.clone());
                is_hook = true;
            }
            Marker::Scheduled(scheduled) => {
                if scanned.scheduled.is_some() {
                    return Err(err("only one #[scheduled] function per script".to_string()));
                }
                scanned.scheduled = Some((scheduled, name.clone()));
                is_hook = true;
            }
            Marker::Callback(l) => listener = Some(l),
        }
    }

    if is_hook && !is_plain(&func) {
        return Err(err(format!(
            "{} must be a plain fn without arguments or return value",
            name
        )));
    }

    let signature = signature(&func);
    match (signature, listener) {
        (Ok((params, returns)), listener) if listener.is_some() || (is_public && !is_hook) => {
            scanned.methods.push(ScannedMethod {
                name,
                listener,
                params,
                returns,
            });
        }
        (Err(reason), Some(_)) => return Err(err(format!("{}: {}", name, reason))),
        (Err(reason), None) if is_public && !is_hook => {
            tracing::debug!("{}.{} is not exported: {}", class, name, reason);
        }
        _ => {}
    }
    Ok(func)
}

/// No arguments, no return value.
fn is_plain(func: &ItemFn) -> bool {
    func.sig.inputs.is_empty()
        && matches!(func.sig.output, ReturnType::Default)
        && signature(func).is_ok()
}

/// Parameters and return type of a function callable through the method
/// convention, or why it isn't.
fn signature(func: &ItemFn) -> std::result::Result<(Vec<Param>, class::ReturnType), String> {
    let sig = &func.sig;
    if !sig.generics.params.is_empty() {
        return Err("generic functions can't be exported".to_string());
    }
    if sig.asyncness.is_some() || sig.unsafety.is_some() {
        return Err("async and unsafe functions can't be exported".to_string());
    }

    let mut params = Vec::with_capacity(sig.inputs.len());
    for input in &sig.inputs {
        let FnArg::Typed(arg) = input else {
            return Err("script functions take no receiver".to_string());
        };
        let param = param(&arg.ty).ok_or_else(|| {
            format!(
                "unsupported argument type `{}`",
                arg.ty.to_token_stream()
            )
        })?;
        params.push(param);
    }

    let returns = match &sig.output {
        ReturnType::Default => Some(class::ReturnType::Unit),
        ReturnType::Type(_, ty) => return_type(ty),
    }
    .ok_or_else(|| format!("unsupported return type `{}`", sig.output.to_token_stream()))?;
    Ok((params, returns))
}

fn type_ident(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(path) if path.qself.is_none() => path.path.get_ident().map(|i| i.to_string()),
        _ => None,
    }
}

fn param(ty: &Type) -> Option<Param> {
    if let Type::Reference(reference) = ty {
        return (reference.mutability.is_none()
            && type_ident(&reference.elem).as_deref() == Some("str"))
        .then_some(Param::Str);
    }
    let ident = type_ident(ty)?;
    PARAM_TYPES
        .contains(&ident.as_str())
        .then_some(Param::Value(ident))
}

fn return_type(ty: &Type) -> Option<class::ReturnType> {
    if let Type::Tuple(tuple) = ty {
        return tuple.elems.is_empty().then_some(class::ReturnType::Unit);
    }
    let returns = match type_ident(ty)?.as_str() {
        "bool" => class::ReturnType::Bool,
        "char" => class::ReturnType::Char,
        "i32" => class::ReturnType::Int,
        "i64" => class::ReturnType::Long,
        "f32" => class::ReturnType::Float,
        "f64" => class::ReturnType::Double,
        "String" => class::ReturnType::Object,
        _ => return None,
    };
    Some(returns)
}

fn imports_commons(tree: &UseTree) -> bool {
    match tree {
        UseTree::Path(path) => path.ident == "al_commons",
        UseTree::Name(name) => name.ident == "al_commons",
        UseTree::Rename(rename) => rename.ident == "al_commons",
        _ => false,
    }
}

/// Classify an attribute by its last path segment.
fn marker(class: &str, attr: &Attribute) -> Result<Option<Marker>> {
    let Some(last) = attr.path().segments.last() else {
        return Ok(None);
    };
    let err = |message: String| Error::Compilation {
        class: Some(class.to_string()),
        message,
    };

    let marker = match last.ident.to_string().as_str() {
        "on_class_load" => Marker::OnLoad,
        "on_class_unload" => Marker::OnUnload,
        "scheduled" => Marker::Scheduled(parse_scheduled(attr).map_err(|e| err(e.to_string()))?),
        "global_callback" => {
            Marker::Callback(parse_listener(attr).map_err(|e| err(e.to_string()))?)
        }
        "object_callback" => {
            return Err(err(
                "#[object_callback] needs a receiver; script functions are static".to_string(),
            ));
        }
        _ => return Ok(None),
    };
    Ok(Some(marker))
}

/// `#[scheduled("0 0 * * * ?", long_running_task = true)]`
fn parse_scheduled(attr: &Attribute) -> syn::Result<Scheduled> {
    let args = attr.parse_args_with(Punctuated::<Expr, Token![,]>::parse_terminated)?;
    let mut scheduled = Scheduled::default();

    for arg in args {
        match arg {
            Expr::Lit(lit) => match lit.lit {
                Lit::Str(s) => scheduled.value.push(s.value()),
                other => return Err(syn::Error::new_spanned(other, "expected a cron expression")),
            },
            Expr::Assign(assign) => {
                let key = match assign.left.as_ref() {
                    Expr::Path(path) if path.path.get_ident().is_some() => {
                        path.path.segments[0].ident.to_string()
                    }
                    other => return Err(syn::Error::new_spanned(other, "expected a flag name")),
                };
                let value = match assign.right.as_ref() {
                    Expr::Lit(syn::ExprLit {
                        lit: Lit::Bool(b), ..
                    }) => b.value,
                    other => return Err(syn::Error::new_spanned(other, "expected a bool")),
                };
                match key.as_str() {
                    "disabled" => scheduled.disabled = value,
                    "instance_per_cron_expression" => scheduled.instance_per_cron_expression = value,
                    "long_running_task" => scheduled.long_running_task = value,
                    _ => return Err(syn::Error::new_spanned(&assign.left, "unknown flag")),
                }
            }
            other => return Err(syn::Error::new_spanned(other, "unexpected argument")),
        }
    }

    if scheduled.value.is_empty() {
        return Err(syn::Error::new_spanned(attr, "no cron expression"));
    }
    Ok(scheduled)
}

/// `#[global_callback("quest.Talk")]` or `#[global_callback(quest::Talk)]`;
/// path segments are joined with dots.
fn parse_listener(attr: &Attribute) -> syn::Result<String> {
    match attr.parse_args::<Expr>()? {
        Expr::Lit(syn::ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        Expr::Path(path) => Ok(path
            .path
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect::<Vec<_>>()
            .join(".")),
        other => Err(syn::Error::new_spanned(other, "expected a listener name")),
    }
}
