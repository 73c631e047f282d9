//! Callback enhancers over class files.
//!
//! An enhancer marks the annotated methods of its scope as enhanced and adds
//! one listener field per distinct (listener, staticness) to the declaring
//! class. Enhanced methods dispatch their callbacks when invoked through
//! [`ScriptClass`](crate::scripting::ScriptClass).

use crate::callbacks::ListenerClass;
use crate::callbacks::enhancer::listener_field_name;
use crate::error::{Error, Result};
use crate::scripting::class::{CallbackScope, ClassFile, FieldInfo};

use super::{ClassTransform, LoaderKind};

/// Enhances methods annotated with a global-scope callback.
pub struct GlobalCallbackEnhancer;

/// Enhances instance methods annotated with an object-scope callback.
pub struct ObjectCallbackEnhancer;

impl ClassTransform for GlobalCallbackEnhancer {
    fn transform_class(&self, _loader: LoaderKind, class: &mut ClassFile) -> Result<bool> {
        enhance(class, CallbackScope::Global)
    }
}

impl ClassTransform for ObjectCallbackEnhancer {
    fn transform_class(&self, _loader: LoaderKind, class: &mut ClassFile) -> Result<bool> {
        enhance(class, CallbackScope::Object)
    }
}

fn enhance(class: &mut ClassFile, scope: CallbackScope) -> Result<bool> {
    let mut fields = Vec::new();

    for method in &mut class.methods {
        let Some(annotation) = &method.callback else {
            continue;
        };
        if annotation.scope != scope || method.enhanced {
            continue;
        }
        if method.symbol.is_none() || method.native {
            tracing::debug!(
                "Skipping {}.{}: abstract and native methods are not enhanced",
                class.name,
                method.name
            );
            continue;
        }
        if scope == CallbackScope::Object && method.is_static {
            tracing::warn!(
                "{}.{} is static, object callbacks need an instance receiver",
                class.name,
                method.name
            );
            continue;
        }
        if annotation.listener.trim().is_empty() {
            return Err(Error::ClassTransform {
                class: class.name.clone(),
                message: format!("method {} names no listener", method.name),
            });
        }

        let listener = ListenerClass::named(annotation.listener.clone());
        let name = listener_field_name(&listener, method.is_static);
        method.enhanced = true;
        fields.push(FieldInfo {
            name,
            listener: annotation.listener.clone(),
            is_static: method.is_static,
        });
    }

    if fields.is_empty() {
        return Ok(false);
    }

    for field in fields {
        if !class.has_field(&field.name) {
            tracing::trace!("Adding listener field {} to {}", field.name, class.name);
            class.fields.push(field);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::class::{CallbackAnnotation, MethodInfo, ReturnType};

    fn method(name: &str, is_static: bool, scope: CallbackScope, listener: &str) -> MethodInfo {
        MethodInfo {
            name: name.to_string(),
            symbol: Some(name.to_string()),
            is_static,
            native: false,
            returns: ReturnType::Unit,
            callback: Some(CallbackAnnotation {
                listener: listener.to_string(),
                scope,
            }),
            enhanced: false,
        }
    }

    #[test]
    fn test_one_field_per_listener() {
        let mut class = ClassFile {
            name: "ai.NpcAi".to_string(),
            methods: vec![
                method("on_spawn", true, CallbackScope::Global, "ai.Spawn"),
                method("on_respawn", true, CallbackScope::Global, "ai.Spawn"),
                method("on_die", false, CallbackScope::Global, "ai.Spawn"),
            ],
            ..Default::default()
        };

        assert!(GlobalCallbackEnhancer
            .transform_class(LoaderKind::Script, &mut class)
            .unwrap());
        assert!(class.methods.iter().all(|m| m.enhanced));
        let names: Vec<_> = class.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["$$$callbackStaticSpawn", "$$$callbackSpawn"]);

        // Idempotent on already enhanced classes.
        assert!(!GlobalCallbackEnhancer
            .transform_class(LoaderKind::Script, &mut class)
            .unwrap());
        assert_eq!(class.fields.len(), 2);
    }

    #[test]
    fn test_scopes_are_separate() {
        let mut class = ClassFile {
            name: "model.Player".to_string(),
            methods: vec![
                method("level_up", false, CallbackScope::Object, "model.LevelUp"),
                method("broadcast", true, CallbackScope::Object, "model.LevelUp"),
            ],
            ..Default::default()
        };

        assert!(!GlobalCallbackEnhancer
            .transform_class(LoaderKind::Script, &mut class)
            .unwrap());
        assert!(ObjectCallbackEnhancer
            .transform_class(LoaderKind::Script, &mut class)
            .unwrap());
        assert!(class.methods[0].enhanced);
        assert!(!class.methods[1].enhanced);
        assert_eq!(class.fields[0].name, "$$$callbackLevelUp");
    }

    #[test]
    fn test_abstract_and_native_are_skipped() {
        let mut abstract_method = method("a", true, CallbackScope::Global, "x.L");
        abstract_method.symbol = None;
        let mut native_method = method("n", true, CallbackScope::Global, "x.L");
        native_method.native = true;
        let mut class = ClassFile {
            name: "x.Y".to_string(),
            methods: vec![abstract_method, native_method],
            ..Default::default()
        };

        assert!(!GlobalCallbackEnhancer
            .transform_class(LoaderKind::Script, &mut class)
            .unwrap());
        assert!(class.fields.is_empty());
    }
}
