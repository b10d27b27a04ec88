use std::ops::{Deref, DerefMut};

use log::error;

use super::{Example, Feature};
use crate::error::Result;

/// Scoped injection of features into one namespace of an example.
///
/// The injected features are removed by `release`, or when the guard is
/// dropped, so nested injections unwind in reverse order by construction.
pub struct NamespaceGuard<'a, 'f> {
    ec: &'a mut Example,
    id: u8,
    injected: &'f [Feature],
    released: bool,
}

impl<'a, 'f> NamespaceGuard<'a, 'f> {
    pub(super) fn new(ec: &'a mut Example, id: u8, features: &'f [Feature]) -> Self {
        ec.add_namespace(id, features);
        Self {
            ec,
            id,
            injected: features,
            released: false,
        }
    }

    /// Removes the injected features, reporting a stack order violation.
    ///
    /// # Errors
    /// `LearnErr::NamespaceOrder` if something was left on top of the namespace.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.ec.remove_namespace(self.id, self.injected)
    }
}

impl Deref for NamespaceGuard<'_, '_> {
    type Target = Example;

    fn deref(&self) -> &Self::Target {
        self.ec
    }
}

impl DerefMut for NamespaceGuard<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ec
    }
}

impl Drop for NamespaceGuard<'_, '_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if let Err(e) = self.ec.remove_namespace(self.id, self.injected) {
            error!(namespace = self.id; "dropping namespace guard: {e}");
        }
    }
}
