//! Trait des handlers et registre de sélection.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use pmocds::{CdsObject, HandlerType};

use crate::budget::run_with_budget;
use crate::{ContentSource, Result};

/// Budget temps mur par handler, sauf configuration contraire.
pub const DEFAULT_HANDLER_BUDGET: Duration = Duration::from_secs(30);

/// Un extracteur de métadonnées, également serveur des ressources qu'il crée.
pub trait MetadataHandler: Send + Sync {
    /// Étiquette unique sous laquelle les ressources du handler sont
    /// enregistrées.
    fn handler_type(&self) -> HandlerType;

    /// Le handler veut-il traiter ce couple (type MIME, extension) ?
    fn accepts(&self, mime_type: &str, extension: &str) -> bool;

    /// Enrichit l'objet. Doit être idempotent : deux appels sur la même
    /// entrée produisent le même objet.
    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()>;

    /// Ouvre la ressource d'indice `res_index`, que ce handler possède.
    fn serve_content(&self, obj: &CdsObject, res_index: usize) -> Result<Box<dyn ContentSource>>;
}

/// Registre ordonné des handlers actifs.
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn MetadataHandler>>,
    budget: Duration,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: Vec::new(),
            budget: DEFAULT_HANDLER_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn register(&mut self, handler: Arc<dyn MetadataHandler>) {
        self.handlers.push(handler);
    }

    /// Handler propriétaire d'une étiquette, pour le dispatch de lecture.
    pub fn by_type(&self, handler_type: HandlerType) -> Option<Arc<dyn MetadataHandler>> {
        self.handlers
            .iter()
            .find(|h| h.handler_type() == handler_type)
            .cloned()
    }

    /// Passe l'objet à tous les handlers qui acceptent son type.
    ///
    /// Chaque handler tourne sous budget sur sa propre copie de l'objet ;
    /// un échec ou un dépassement est journalisé et le handler est ignoré
    /// pour cet objet, conformément à la règle « par fichier : on journalise
    /// et on continue ».
    pub fn fill(&self, obj: &mut CdsObject) {
        let extension = obj
            .location
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let mime = obj.mime_type().to_string();

        for handler in &self.handlers {
            if !handler.accepts(&mime, &extension) {
                continue;
            }
            match run_with_budget(handler.clone(), obj, self.budget) {
                Ok(enriched) => *obj = enriched,
                Err(e) => {
                    warn!(
                        handler = handler.handler_type().as_str(),
                        location = %obj.location.display(),
                        error = %e,
                        "metadata handler skipped"
                    );
                }
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
