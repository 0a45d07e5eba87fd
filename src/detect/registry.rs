use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::FaceDetector;
use super::backends::FixedBackend;

type Constructor = Arc<dyn Fn() -> Result<Box<dyn FaceDetector>> + Send + Sync>;

/// Detector selection, as read from configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    /// Backend name: `ultraface`, `fixed` or `none`.
    pub backend: String,
    /// ONNX model used by `ultraface`.
    pub model_path: PathBuf,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: "ultraface".to_string(),
            model_path: PathBuf::from("models/version-RFB-320.onnx"),
        }
    }
}

/// Thread-safe registry of detector constructors.
///
/// The factory hands out a fresh detector on every `create` call, so two
/// concurrent streams never drive the same model instance.
#[derive(Clone)]
pub struct DetectorFactory {
    constructors: HashMap<String, Constructor>,
    default_name: Option<String>,
}

impl DetectorFactory {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
            default_name: None,
        }
    }

    /// Factory with the built-in backends, defaulting to `settings.backend`.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let mut factory = Self::new();
        factory.register("none", || Ok(FixedBackend::empty()));
        #[cfg(feature = "backend-tract")]
        {
            let model_path = settings.model_path.clone();
            factory.register("ultraface", move || {
                super::backends::UltraFaceBackend::new(&model_path)
            });
        }
        factory.set_default(&settings.backend)?;
        Ok(factory)
    }

    /// Factory whose only backend reports `detector`'s boxes every frame.
    pub fn fixed(detector: FixedBackend) -> Self {
        let mut factory = Self::new();
        factory.register("fixed", move || Ok(detector.clone()));
        factory
    }

    /// Register a constructor. The first registered backend becomes the default.
    pub fn register<D, F>(&mut self, name: &str, constructor: F)
    where
        D: FaceDetector + 'static,
        F: Fn() -> Result<D> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        let constructor: Constructor =
            Arc::new(move || constructor().map(|d| Box::new(d) as Box<dyn FaceDetector>));
        self.constructors.insert(name.to_string(), constructor);
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.constructors.contains_key(name) {
            return Err(anyhow!(
                "detector backend '{}' not available (registered: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Build a new instance of the named backend.
    pub fn create_named(&self, name: &str) -> Result<Box<dyn FaceDetector>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| anyhow!("detector backend '{}' not registered", name))?;
        let detector = constructor()?;
        log::debug!("created detector instance ({})", detector.name());
        Ok(detector)
    }

    /// Build a new instance of the default backend.
    pub fn create(&self) -> Result<Box<dyn FaceDetector>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.create_named(name)
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DetectorFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RelativeBox;
    use crate::frame::Frame;

    #[test]
    fn each_create_returns_an_independent_detector() -> Result<()> {
        let factory =
            DetectorFactory::fixed(FixedBackend::new(vec![RelativeBox::new(0.0, 0.0, 0.5, 0.5)]));
        let frame = Frame::filled(4, 4, [0, 0, 0]);

        let mut a = factory.create()?;
        let mut b = factory.create()?;
        a.detect(&frame)?;
        a.detect(&frame)?;
        assert_eq!(b.detect(&frame)?.len(), 1);
        assert_eq!(a.name(), "fixed");
        Ok(())
    }

    #[test]
    fn unknown_default_is_rejected() {
        let settings = DetectorSettings {
            backend: "haar".to_string(),
            ..DetectorSettings::default()
        };
        let err = DetectorFactory::from_settings(&settings)
            .err()
            .expect("unknown backend must fail");
        assert!(err.to_string().contains("haar"));
    }

    #[test]
    fn none_backend_is_always_available() -> Result<()> {
        let settings = DetectorSettings {
            backend: "none".to_string(),
            ..DetectorSettings::default()
        };
        let factory = DetectorFactory::from_settings(&settings)?;
        let mut detector = factory.create()?;
        assert!(detector.detect(&Frame::filled(2, 2, [1, 1, 1]))?.is_empty());
        assert!(factory.list().contains(&"none".to_string()));
        Ok(())
    }

    #[test]
    fn first_registered_backend_is_default() -> Result<()> {
        let mut factory = DetectorFactory::new();
        factory.register("first", || Ok(FixedBackend::empty()));
        factory.register("second", || {
            Ok(FixedBackend::new(vec![RelativeBox::new(0.0, 0.0, 1.0, 1.0)]))
        });
        let mut detector = factory.create()?;
        assert!(detector.detect(&Frame::filled(2, 2, [0, 0, 0]))?.is_empty());
        assert_eq!(factory.list(), vec!["first", "second"]);
        Ok(())
    }
}
