//! Name Resolution
//!
//! Maps an inbound `/{resource}/{action}` path onto the camelCase object name
//! used by the exposed schema: `/databases/list` → `databasesList`.
//! Resolution is pure and performs no existence check.

/// Resolve a resource/action pair into a candidate object name
///
/// The action's first character is upper-cased and appended to the
/// resource. An empty action yields the resource unchanged.
#[must_use]
pub fn resolve(resource: &str, action: &str) -> String {
    let mut chars = action.chars();
    match chars.next() {
        None => resource.to_string(),
        Some(first) => {
            let mut name = String::with_capacity(resource.len() + action.len());
            name.push_str(resource);
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
            name
        }
    }
}
