//! Utility macros for reducing boilerplate

/// Implement `FromRef<AppState>` so handlers can extract one field as state.
///
/// # Example
/// ```ignore
/// impl_from_ref!(Arc<TieredCache>, cache);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for Arc<TieredCache> {
///     fn from_ref(state: &AppState) -> Self {
///         state.cache.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
