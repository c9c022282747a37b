//! ### Cache
//! Surveys and boundary files loaded once per process and shared by
//! reference. Source files are assumed not to change while running.

use crate::boundary::BoundarySet;
use crate::convert;
use crate::model::Survey;
use anyhow::Context;
use log::debug;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
};

#[derive(Default)]
pub struct DataCache {
    surveys: HashMap<(PathBuf, String), Rc<Survey>>,
    boundaries: HashMap<PathBuf, Rc<BoundarySet>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn survey(&mut self, path: &Path, sentinel: &str) -> anyhow::Result<Rc<Survey>> {
        let key = (path.to_path_buf(), sentinel.to_string());
        if let Some(survey) = self.surveys.get(&key) {
            debug!("survey cache hit: {}", path.display());
            return Ok(Rc::clone(survey));
        }
        let survey = Rc::new(convert::load_survey(path, sentinel)?);
        self.surveys.insert(key, Rc::clone(&survey));
        Ok(survey)
    }

    pub fn boundaries(&mut self, path: &Path) -> anyhow::Result<Rc<BoundarySet>> {
        if let Some(boundaries) = self.boundaries.get(path) {
            debug!("boundary cache hit: {}", path.display());
            return Ok(Rc::clone(boundaries));
        }
        let boundaries = Rc::new(
            BoundarySet::from_path(path)
                .with_context(|| format!("failed to load boundaries {}", path.display()))?,
        );
        self.boundaries.insert(path.to_path_buf(), Rc::clone(&boundaries));
        Ok(boundaries)
    }
}
