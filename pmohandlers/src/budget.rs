//! Enveloppe à budget temps mur autour d'un handler.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use pmocds::CdsObject;

use crate::registry::MetadataHandler;
use crate::{HandlerError, Result};

/// Exécute `fill_metadata` sur une copie de l'objet, bornée par `budget`.
///
/// Le handler travaille dans un thread dédié sur sa propre copie ; en cas de
/// dépassement l'appelant reprend avec l'objet intact et le thread orphelin
/// termine dans le vide, son résultat est jeté. Les paniques du handler sont
/// converties en [`HandlerError::Failed`].
pub fn run_with_budget(
    handler: Arc<dyn MetadataHandler>,
    obj: &CdsObject,
    budget: Duration,
) -> Result<CdsObject> {
    let name = handler.handler_type().as_str();
    let mut copy = obj.clone();
    let (tx, rx) = mpsc::channel();

    std::thread::Builder::new()
        .name(format!("handler-{name}"))
        .spawn(move || {
            let outcome = handler.fill_metadata(&mut copy).map(|_| copy);
            let _ = tx.send(outcome);
        })
        .map_err(|e| HandlerError::failed(name, e))?;

    match rx.recv_timeout(budget) {
        Ok(outcome) => outcome,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(HandlerError::Timeout {
            handler: name,
            budget,
        }),
        // Le thread a paniqué avant d'envoyer son résultat
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(HandlerError::Failed {
            handler: name,
            cause: "handler panicked".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentSource;
    use pmocds::HandlerType;

    struct SlowHandler;

    impl MetadataHandler for SlowHandler {
        fn handler_type(&self) -> HandlerType {
            HandlerType::MediaProbe
        }

        fn accepts(&self, _mime: &str, _ext: &str) -> bool {
            true
        }

        fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
            std::thread::sleep(Duration::from_secs(5));
            obj.add_meta_str("x-slow", "done");
            Ok(())
        }

        fn serve_content(
            &self,
            _obj: &CdsObject,
            _res_index: usize,
        ) -> Result<Box<dyn ContentSource>> {
            unreachable!()
        }
    }

    struct PanickyHandler;

    impl MetadataHandler for PanickyHandler {
        fn handler_type(&self) -> HandlerType {
            HandlerType::Exif
        }

        fn accepts(&self, _mime: &str, _ext: &str) -> bool {
            true
        }

        fn fill_metadata(&self, _obj: &mut CdsObject) -> Result<()> {
            panic!("boom");
        }

        fn serve_content(
            &self,
            _obj: &CdsObject,
            _res_index: usize,
        ) -> Result<Box<dyn ContentSource>> {
            unreachable!()
        }
    }

    #[test]
    fn budget_expiry_leaves_object_untouched() {
        let obj = CdsObject::item("/m/slow.mp3", "audio/mpeg");
        let err = run_with_budget(Arc::new(SlowHandler), &obj, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, HandlerError::Timeout { .. }));
        assert!(obj.meta_str("x-slow").is_none());
    }

    #[test]
    fn panics_are_trapped_at_the_boundary() {
        let obj = CdsObject::item("/m/boom.jpg", "image/jpeg");
        let err = run_with_budget(Arc::new(PanickyHandler), &obj, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed { .. }));
    }
}
