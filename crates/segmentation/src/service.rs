use crate::audit::AuditHistory;
use crate::auto_assign::AutoAssigner;
use crate::export::HistoryExporter;
use crate::membership::MembershipManager;
use crate::registry::SegmentRegistry;
use crate::store::EngineStore;
use crate::users::UserDirectory;
use cohort_core::AppConfig;
use std::sync::Arc;

/// Every component wired onto one shared store.
pub struct SegmentService {
    pub registry: SegmentRegistry,
    pub memberships: MembershipManager,
    pub auto_assign: AutoAssigner,
    pub users: UserDirectory,
    pub history: AuditHistory,
    pub exporter: HistoryExporter,
}

impl SegmentService {
    pub fn new(store: EngineStore, config: &AppConfig) -> Self {
        let store = Arc::new(store);
        let max_slug_len = config.membership.max_slug_len;
        Self {
            registry: SegmentRegistry::new(store.clone(), max_slug_len),
            memberships: MembershipManager::new(store.clone(), config.membership.clone()),
            auto_assign: AutoAssigner::new(store.clone(), max_slug_len),
            users: UserDirectory::new(store.clone()),
            history: AuditHistory::new(store),
            exporter: HistoryExporter::new(&config.export.dir, config.export.link_prefix.clone()),
        }
    }

    pub fn in_memory(config: &AppConfig) -> Self {
        Self::new(EngineStore::in_memory(), config)
    }
}
