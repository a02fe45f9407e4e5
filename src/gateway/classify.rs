/// How a request is cached, derived from its path alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Long-lived file served cache-first
  StaticAsset,
  /// Anything else, served network-first
  Dynamic,
}

/// Suffix-based request classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
  extensions: Vec<String>,
}

impl Classifier {
  pub fn new(extensions: &[String]) -> Self {
    Self {
      extensions: extensions.to_vec(),
    }
  }

  /// Classify a request path (no query string). Matching is case-sensitive.
  pub fn classify(&self, path: &str) -> RequestClass {
    if self.extensions.iter().any(|ext| path.ends_with(ext.as_str())) {
      RequestClass::StaticAsset
    } else {
      RequestClass::Dynamic
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::CacheConfig;

  fn classifier() -> Classifier {
    Classifier::new(&CacheConfig::default().static_extensions)
  }

  #[test]
  fn test_static_suffixes() {
    let c = classifier();
    for path in ["/app.js", "/css/site.css", "/manifest.json", "/fonts/a.woff2", "/img/logo.svg"] {
      assert_eq!(c.classify(path), RequestClass::StaticAsset, "{}", path);
    }
  }

  #[test]
  fn test_pages_are_dynamic() {
    let c = classifier();
    for path in ["/", "/index.html", "/api/points", "/app.jsx", "/data.json/edit"] {
      assert_eq!(c.classify(path), RequestClass::Dynamic, "{}", path);
    }
  }

  #[test]
  fn test_matching_is_case_sensitive() {
    assert_eq!(classifier().classify("/LOGO.PNG"), RequestClass::Dynamic);
  }
}
