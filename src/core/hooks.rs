//! Model lifecycle hooks
//!
//! Every [`Model`](super::model::Model) is also [`Hooks`]. Each callback has a
//! no-op default, so a model overrides only the ones it cares about and the
//! rest are skipped.
//!
//! Backends call the `run_*` functions around every mutating operation:
//!
//! | operation         | before                         | after                         |
//! |-------------------|--------------------------------|-------------------------------|
//! | create, save      | `before_save`, `before_create` | `after_create`, `after_save`  |
//! | update, partial   | `before_save`, `before_update` | `after_update`, `after_save`  |
//! | delete            | `before_delete`                | `after_delete`                |
//!
//! Save (upsert) always uses the create ordering, even when the backend ends
//! up updating an existing row. A failing before-hook aborts the operation
//! before anything is written; a failing after-hook is reported although the
//! write has already been committed.

use super::context::Context;
use super::error::Result;

/// Optional lifecycle callbacks
///
/// # Example
///
/// ```
/// use dbase::core::hooks::Hooks;
/// use dbase::{Context, DatabaseError, Result};
///
/// struct Account {
///     email: String,
/// }
///
/// impl Hooks for Account {
///     fn before_save(&mut self, _ctx: &Context) -> Result<()> {
///         self.email = self.email.trim().to_lowercase();
///         if self.email.is_empty() {
///             return Err(DatabaseError::invalid_model("email is required"));
///         }
///         Ok(())
///     }
/// }
/// ```
#[allow(unused_variables)]
pub trait Hooks {
    /// Runs before a create, update or save
    fn before_save(&mut self, ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Runs after a create, update or save
    fn after_save(&mut self, ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Runs before inserting a new record
    fn before_create(&mut self, ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Runs after inserting a new record
    fn after_create(&mut self, ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Runs before updating a record
    fn before_update(&mut self, ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Runs after updating a record
    fn after_update(&mut self, ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Runs before deleting a record
    fn before_delete(&mut self, ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Runs after deleting a record
    fn after_delete(&mut self, ctx: &Context) -> Result<()> {
        Ok(())
    }
}

/// `before_save` then `before_create`
pub fn run_before_create<H: Hooks + ?Sized>(ctx: &Context, model: &mut H) -> Result<()> {
    model.before_save(ctx)?;
    model.before_create(ctx)
}

/// `after_create` then `after_save`
pub fn run_after_create<H: Hooks + ?Sized>(ctx: &Context, model: &mut H) -> Result<()> {
    model.after_create(ctx)?;
    model.after_save(ctx)
}

/// `before_save` then `before_update`
pub fn run_before_update<H: Hooks + ?Sized>(ctx: &Context, model: &mut H) -> Result<()> {
    model.before_save(ctx)?;
    model.before_update(ctx)
}

/// `after_update` then `after_save`
pub fn run_after_update<H: Hooks + ?Sized>(ctx: &Context, model: &mut H) -> Result<()> {
    model.after_update(ctx)?;
    model.after_save(ctx)
}

/// `before_delete`
pub fn run_before_delete<H: Hooks + ?Sized>(ctx: &Context, model: &mut H) -> Result<()> {
    model.before_delete(ctx)
}

/// `after_delete`
pub fn run_after_delete<H: Hooks + ?Sized>(ctx: &Context, model: &mut H) -> Result<()> {
    model.after_delete(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::DatabaseError;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn record(&mut self, name: &'static str) -> Result<()> {
            self.calls.push(name);
            if self.fail_on == Some(name) {
                return Err(DatabaseError::other(format!("{} rejected", name)));
            }
            Ok(())
        }
    }

    impl Hooks for Recorder {
        fn before_save(&mut self, _ctx: &Context) -> Result<()> {
            self.record("before_save")
        }
        fn after_save(&mut self, _ctx: &Context) -> Result<()> {
            self.record("after_save")
        }
        fn before_create(&mut self, _ctx: &Context) -> Result<()> {
            self.record("before_create")
        }
        fn after_create(&mut self, _ctx: &Context) -> Result<()> {
            self.record("after_create")
        }
        fn before_update(&mut self, _ctx: &Context) -> Result<()> {
            self.record("before_update")
        }
        fn after_update(&mut self, _ctx: &Context) -> Result<()> {
            self.record("after_update")
        }
        fn before_delete(&mut self, _ctx: &Context) -> Result<()> {
            self.record("before_delete")
        }
        fn after_delete(&mut self, _ctx: &Context) -> Result<()> {
            self.record("after_delete")
        }
    }

    struct Plain;
    impl Hooks for Plain {}

    #[test]
    fn test_create_order() {
        let ctx = Context::background();
        let mut model = Recorder::default();
        run_before_create(&ctx, &mut model).unwrap();
        run_after_create(&ctx, &mut model).unwrap();
        assert_eq!(
            model.calls,
            vec!["before_save", "before_create", "after_create", "after_save"]
        );
    }

    #[test]
    fn test_update_order() {
        let ctx = Context::background();
        let mut model = Recorder::default();
        run_before_update(&ctx, &mut model).unwrap();
        run_after_update(&ctx, &mut model).unwrap();
        assert_eq!(
            model.calls,
            vec!["before_save", "before_update", "after_update", "after_save"]
        );
    }

    #[test]
    fn test_delete_skips_save_hooks() {
        let ctx = Context::background();
        let mut model = Recorder::default();
        run_before_delete(&ctx, &mut model).unwrap();
        run_after_delete(&ctx, &mut model).unwrap();
        assert_eq!(model.calls, vec!["before_delete", "after_delete"]);
    }

    #[test]
    fn test_failure_short_circuits_with_original_error() {
        let ctx = Context::background();
        let mut model = Recorder {
            fail_on: Some("before_save"),
            ..Default::default()
        };
        let err = run_before_create(&ctx, &mut model).unwrap_err();
        assert_eq!(err.to_string(), "before_save rejected");
        assert_eq!(model.calls, vec!["before_save"]);
    }

    #[test]
    fn test_models_without_hooks_pass() {
        let ctx = Context::background();
        let mut model = Plain;
        assert!(run_before_create(&ctx, &mut model).is_ok());
        assert!(run_after_update(&ctx, &mut model).is_ok());
        assert!(run_before_delete(&ctx, &mut model).is_ok());
    }
}
