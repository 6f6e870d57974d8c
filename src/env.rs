use crate::value::Value;

/// Releases a host object once the VM retires it: popped, overwritten,
/// unwound at a scope exit, or swept by `Module::cleanup`.
pub trait Free {
    fn free(&mut self, value: Value);
}

impl<F: FnMut(Value)> Free for F {
    fn free(&mut self, value: Value) {
        self(value)
    }
}

/// Host bridge for one compile/execute cycle.
///
/// `globals` occupy the lowest slots, in order, and are read-only to
/// scripts. The same `Env` (same globals, same order) must be used to
/// compile and to run a module.
#[derive(Default)]
pub struct Env<'e> {
    globals: &'e [(&'e str, Value)],
    free: Option<&'e mut dyn Free>,
}

impl<'e> Env<'e> {
    pub fn new() -> Self {
        Env { globals: &[], free: None }
    }

    pub fn with_globals(mut self, globals: &'e [(&'e str, Value)]) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_free(mut self, free: &'e mut dyn Free) -> Self {
        self.free = Some(free);
        self
    }

    pub fn globals(&self) -> &'e [(&'e str, Value)] {
        self.globals
    }

    /// Number of slots reserved for globals.
    pub fn predef_len(&self) -> usize {
        self.globals.len()
    }

    /// Hands an object-kind value to the free capability. Other kinds are
    /// ignored.
    pub(crate) fn release(&mut self, value: Value) {
        if !value.is_object() {
            return;
        }
        if let Some(free) = self.free.as_deref_mut() {
            free.free(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_only_objects() {
        let mut freed = Vec::new();
        let mut collect = |v: Value| freed.push(v);
        {
            let mut env = Env::new().with_free(&mut collect);
            env.release(Value::Number(1.0));
            env.release(Value::None);
            env.release(Value::object(1, 9));
            env.release(Value::host_str(4));
        }
        assert_eq!(freed, vec![Value::object(1, 9), Value::host_str(4)]);
    }

    #[test]
    fn globals_define_predef_len() {
        let globals = [("pi", Value::Number(3.14)), ("e", Value::Number(2.71))];
        let env = Env::new().with_globals(&globals);
        assert_eq!(env.predef_len(), 2);
        assert_eq!(env.globals()[1].0, "e");
        assert_eq!(Env::new().predef_len(), 0);
    }
}
