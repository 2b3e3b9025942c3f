//! Contrat de l'interpréteur d'import embarqué.
//!
//! Le transformateur reçoit chaque objet fraîchement extrait et peut créer
//! des entrées virtuelles par les trois callbacks de [`TransformerHost`].
//! Le partage de données passe exclusivement par ces callbacks, jamais par
//! la mémoire de l'interpréteur.

use pmocds::{CdsObject, ObjectId};

use crate::Result;

/// Callbacks offerts au transformateur pendant l'import d'un objet.
pub trait TransformerHost {
    /// Copie profonde de `obj`, prête à être modifiée librement.
    fn copy_object(&self, obj: &CdsObject) -> CdsObject;

    /// Garantit l'existence d'une chaîne de containers virtuels, en créant
    /// les maillons manquants. Renvoie l'id du container terminal.
    ///
    /// # Errors
    ///
    /// [`crate::ImportError::Shutdown`] après l'arrêt de l'hôte.
    fn add_container_tree(&self, chain: Vec<CdsObject>) -> Result<ObjectId>;

    /// Insère `obj` sous `parent_id`.
    ///
    /// Pour un item physique, `ref_id` est posé vers l'objet d'origine et le
    /// flag `USE_RESOURCE_REF` est levé (`PLAYLIST_REF` est préservé s'il
    /// est déjà présent, cas des entrées de playlist).
    fn add_cds_object(&self, obj: CdsObject, parent_id: ObjectId) -> Result<ObjectId>;
}

/// Un transformateur d'import (interpréteur de scripts utilisateur).
///
/// L'implémentation est une boîte noire : elle peut appeler les callbacks
/// autant de fois qu'elle veut, dans n'importe quel ordre. Une erreur fatale
/// interrompt l'import de l'objet courant sans empoisonner le pipeline.
pub trait ImportTransformer: Send + Sync {
    /// Traite un objet fraîchement extrait.
    fn import(&self, orig: &CdsObject, host: &dyn TransformerHost) -> Result<()>;

    /// Signal d'arrêt : l'implémentation doit rendre la main rapidement.
    /// Tout callback appelé ensuite répond `Shutdown`.
    fn shutdown(&self) {}
}
