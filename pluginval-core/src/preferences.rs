use crate::config::write_atomic;
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub mod keys {
  pub const STRICTNESS_LEVEL: &str = "strictnessLevel";
  pub const LAST_PLUGIN_PATH: &str = "lastPluginPath";
  pub const VALIDATE_IN_PROCESS: &str = "validateInProcess";
}

// One store per process; the handle slot below only serves the loop thread.
static OPEN: AtomicBool = AtomicBool::new(false);

thread_local! {
  static REGISTERED: RefCell<Option<PreferencesHandle>> = const { RefCell::new(None) };
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "PROPERTIES")]
struct PropertiesXml {
  #[serde(rename = "VALUE", default)]
  values: Vec<ValueXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValueXml {
  #[serde(rename = "@name")]
  name: String,
  #[serde(rename = "@val")]
  val: String,
}

#[derive(Debug)]
pub struct PreferencesStore {
  path: PathBuf,
  values: BTreeMap<String, String>,
  save_delay: Duration,
  last_change: Option<Instant>,
}

impl PreferencesStore {
  pub fn load(path: &Path, save_delay: Duration) -> anyhow::Result<Self> {
    let values = if path.exists() {
      let raw = fs::read_to_string(path)?;
      match quick_xml::de::from_str::<PropertiesXml>(&raw) {
        Ok(xml) => xml.values.into_iter().map(|v| (v.name, v.val)).collect(),
        Err(e) => {
          tracing::warn!(
            path = %path.display(),
            error = %e,
            "preferences file unreadable; starting with empty preferences"
          );
          BTreeMap::new()
        }
      }
    } else {
      BTreeMap::new()
    };

    Ok(Self {
      path: path.to_path_buf(),
      values,
      save_delay,
      last_change: None,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.values.get(key).map(String::as_str)
  }

  pub fn get_u32(&self, key: &str) -> Option<u32> {
    self.get(key).and_then(|v| v.trim().parse().ok())
  }

  pub fn get_bool(&self, key: &str) -> Option<bool> {
    match self.get(key)? {
      "1" | "true" => Some(true),
      "0" | "false" => Some(false),
      _ => None,
    }
  }

  pub fn set(&mut self, key: &str, value: impl Into<String>) {
    self.set_at(key, value, Instant::now());
  }

  pub fn set_at(&mut self, key: &str, value: impl Into<String>, now: Instant) {
    let value = value.into();
    if self.values.get(key) == Some(&value) {
      return;
    }
    self.values.insert(key.to_string(), value);
    self.last_change = Some(now);
  }

  pub fn needs_saving(&self) -> bool {
    self.last_change.is_some()
  }

  pub fn flush_if_due(&mut self, now: Instant) -> anyhow::Result<bool> {
    let Some(changed) = self.last_change else {
      return Ok(false);
    };
    if now.saturating_duration_since(changed) < self.save_delay {
      return Ok(false);
    }
    self.save()?;
    Ok(true)
  }

  pub fn save(&mut self) -> anyhow::Result<()> {
    let xml = PropertiesXml {
      values: self
        .values
        .iter()
        .map(|(name, val)| ValueXml {
          name: name.clone(),
          val: val.clone(),
        })
        .collect(),
    };
    let body = quick_xml::se::to_string(&xml)?;
    write_atomic(
      &self.path,
      &format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}\n"),
    )?;
    self.last_change = None;
    tracing::debug!(path = %self.path.display(), "preferences saved");
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct PreferencesHandle(Rc<RefCell<PreferencesStore>>);

impl PreferencesHandle {
  pub fn borrow(&self) -> Ref<'_, PreferencesStore> {
    self.0.borrow()
  }

  pub fn borrow_mut(&self) -> RefMut<'_, PreferencesStore> {
    self.0.borrow_mut()
  }
}

#[derive(Debug)]
pub struct Preferences {
  handle: PreferencesHandle,
}

impl Preferences {
  pub fn open(path: &Path, save_delay: Duration) -> anyhow::Result<Self> {
    if OPEN
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      anyhow::bail!("preferences store is already open in this process");
    }

    let store = match PreferencesStore::load(path, save_delay) {
      Ok(store) => store,
      Err(e) => {
        OPEN.store(false, Ordering::SeqCst);
        return Err(e);
      }
    };
    let handle = PreferencesHandle(Rc::new(RefCell::new(store)));
    REGISTERED.with(|slot| *slot.borrow_mut() = Some(handle.clone()));
    tracing::info!(path = %path.display(), "preferences opened");
    Ok(Self { handle })
  }

  pub fn handle(&self) -> PreferencesHandle {
    self.handle.clone()
  }

  pub fn poll(&self, now: Instant) {
    if let Err(e) = self.handle.borrow_mut().flush_if_due(now) {
      tracing::error!(error = ?e, "failed to save preferences");
    }
  }
}

impl Drop for Preferences {
  fn drop(&mut self) {
    {
      let mut store = self.handle.borrow_mut();
      if store.needs_saving() {
        if let Err(e) = store.save() {
          tracing::error!(error = ?e, "failed to save preferences on close");
        }
      }
    }
    REGISTERED.with(|slot| *slot.borrow_mut() = None);
    OPEN.store(false, Ordering::SeqCst);
    tracing::debug!("preferences closed");
  }
}

/// The process-wide preferences.
///
/// # Panics
///
/// Panics if no session has opened the store yet. Reaching this from the
/// child-job path is a programming error.
pub fn app_preferences() -> PreferencesHandle {
  REGISTERED.with(|slot| match slot.borrow().as_ref() {
    Some(handle) => handle.clone(),
    None => panic!("app_preferences() called before the preferences store was opened (child-job process?)"),
  })
}

#[cfg(test)]
pub(crate) fn is_open() -> bool {
  REGISTERED.with(|slot| slot.borrow().is_some())
}

// Tests that open the store hold this; the store is process-wide.
#[cfg(test)]
pub(crate) fn serial() -> std::sync::MutexGuard<'static, ()> {
  static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
  LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;

  const DELAY: Duration = Duration::from_millis(2_000);

  #[test]
  #[should_panic(expected = "before the preferences store was opened")]
  fn accessor_panics_before_open() {
    let _ = app_preferences();
  }

  #[test]
  fn accessor_returns_the_same_instance() {
    let _serial = serial();
    let dir = tempfile::tempdir().unwrap();
    let prefs = Preferences::open(&dir.path().join("prefs.xml"), DELAY).unwrap();

    let a = app_preferences();
    let b = app_preferences();
    assert!(Rc::ptr_eq(&a.0, &b.0));
    assert!(Rc::ptr_eq(&a.0, &prefs.handle().0));
  }

  #[test]
  fn second_open_is_rejected_and_drop_closes_the_slot() {
    let _serial = serial();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.xml");
    let prefs = Preferences::open(&path, DELAY).unwrap();
    assert!(Preferences::open(&path, DELAY).is_err());

    drop(prefs);
    assert!(!is_open());
    let reopened = Preferences::open(&path, DELAY).unwrap();
    drop(reopened);
  }

  #[test]
  fn second_open_from_another_thread_is_rejected() {
    let _serial = serial();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.xml");
    let prefs = Preferences::open(&path, DELAY).unwrap();

    let other = path.clone();
    let rejected = std::thread::spawn(move || Preferences::open(&other, DELAY).is_err())
      .join()
      .unwrap();
    assert!(rejected);

    drop(prefs);
    let after_close = std::thread::spawn(move || Preferences::open(&path, DELAY).is_ok())
      .join()
      .unwrap();
    assert!(after_close);
  }

  #[test]
  fn writes_are_debounced_from_the_last_change() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.xml");
    let mut store = PreferencesStore::load(&path, DELAY).unwrap();

    let t0 = Instant::now();
    store.set_at(keys::STRICTNESS_LEVEL, "7", t0);
    store.set_at(keys::LAST_PLUGIN_PATH, "/plugins/Gain.vst3", t0 + Duration::from_millis(1_500));

    assert!(!store.flush_if_due(t0 + Duration::from_millis(2_500)).unwrap());
    assert!(!path.exists());

    assert!(store.flush_if_due(t0 + Duration::from_millis(3_600)).unwrap());
    assert!(path.exists());
    assert!(!store.needs_saving());

    let reloaded = PreferencesStore::load(&path, DELAY).unwrap();
    assert_eq!(reloaded.get_u32(keys::STRICTNESS_LEVEL), Some(7));
    assert_eq!(reloaded.get(keys::LAST_PLUGIN_PATH), Some("/plugins/Gain.vst3"));
  }

  #[test]
  fn unchanged_values_do_not_schedule_a_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = PreferencesStore::load(&dir.path().join("prefs.xml"), DELAY).unwrap();
    store.set(keys::VALIDATE_IN_PROCESS, "true");
    store.save().unwrap();

    store.set(keys::VALIDATE_IN_PROCESS, "true");
    assert!(!store.needs_saving());
    assert_eq!(store.get_bool(keys::VALIDATE_IN_PROCESS), Some(true));
  }

  #[test]
  fn closing_flushes_pending_changes() {
    let _serial = serial();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.xml");
    let prefs = Preferences::open(&path, DELAY).unwrap();
    app_preferences().borrow_mut().set(keys::STRICTNESS_LEVEL, "3");
    drop(prefs);

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("<PROPERTIES>"));
    assert!(raw.contains("name=\"strictnessLevel\""));
  }
}
