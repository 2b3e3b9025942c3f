//! Dispatch de lecture : `(id, indice de ressource)` vers une source d'octets.

use std::sync::Arc;

use tracing::debug;

use pmocatalog::Catalog;
use pmocds::{ObjectFlags, ObjectId, INVALID_OBJECT_ID};

use crate::registry::HandlerRegistry;
use crate::{ContentSource, HandlerError, Result};

/// Point d'entrée des lectures de la couche HTTP.
///
/// Thread-safe : la résolution ne garde aucun état mutable, chaque appel
/// recharge l'objet depuis le catalogue.
pub struct ResourceDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl ResourceDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        ResourceDispatcher { registry }
    }

    /// Ouvre la ressource `res_index` de l'objet `id`.
    ///
    /// Si l'objet porte `USE_RESOURCE_REF` et référence une source physique,
    /// ce sont les ressources du référent qui sont servies. La gestion des
    /// en-têtes Range reste à l'appelant, la source renvoyée sait se
    /// repositionner.
    pub fn open(
        &self,
        catalog: &Catalog,
        id: ObjectId,
        res_index: usize,
    ) -> Result<Box<dyn ContentSource>> {
        let mut obj = catalog.load(id)?;
        if obj.flags.has(ObjectFlags::USE_RESOURCE_REF) && obj.ref_id != INVALID_OBJECT_ID {
            debug!(id, ref_id = obj.ref_id, "following resource reference");
            obj = catalog.load(obj.ref_id)?;
        }

        let res = obj
            .resources
            .get(res_index)
            .ok_or(HandlerError::ResourceNotFound { id, index: res_index })?;
        let handler = self
            .registry
            .by_type(res.handler)
            .ok_or(HandlerError::NoHandler(res.handler))?;
        debug!(
            id,
            res_index,
            handler = res.handler.as_str(),
            "dispatching resource read"
        );
        handler.serve_content(&obj, res_index)
    }
}
