// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name-indexed tables of the topics and services a node owns.
//!
//! One [`Registry`] is shared by the node facade, the connection acceptor
//! and every publication.

use crate::error::{Result, TcprosError};
use crate::publication::{BrokenSocketRegistry, Publication, TopicType};
use crate::service::ServiceEntry;
use dashmap::DashMap;
use std::sync::Arc;

/// Record of a local subscription, kept for lookups and introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub topic: String,
    pub topic_type: TopicType,
}

/// Topic and service tables of one node.
#[derive(Debug)]
pub struct Registry {
    caller_id: String,
    publications: DashMap<String, Arc<Publication>>,
    subscriptions: DashMap<String, SubscriptionEntry>,
    services: DashMap<String, Arc<ServiceEntry>>,
    broken: Arc<BrokenSocketRegistry>,
}

impl Registry {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            publications: DashMap::new(),
            subscriptions: DashMap::new(),
            services: DashMap::new(),
            broken: Arc::new(BrokenSocketRegistry::new()),
        }
    }

    /// Fully qualified id of the owning node.
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn broken_sockets(&self) -> &Arc<BrokenSocketRegistry> {
        &self.broken
    }

    /// Register a publication, or return the existing one for the same type.
    pub fn add_publication(&self, publication: Publication) -> Result<Arc<Publication>> {
        use dashmap::mapref::entry::Entry;

        match self.publications.entry(publication.topic().to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().topic_type() != publication.topic_type() {
                    return Err(TcprosError::Registration(format!(
                        "topic {} already advertised as {}",
                        publication.topic(),
                        existing.get().topic_type().type_name
                    )));
                }
                if existing.get().is_latching() != publication.is_latching() {
                    return Err(TcprosError::Registration(format!(
                        "topic {} already advertised with latching={}",
                        publication.topic(),
                        existing.get().is_latching()
                    )));
                }
                Ok(existing.get().clone())
            }
            Entry::Vacant(slot) => Ok(slot.insert(Arc::new(publication)).clone()),
        }
    }

    pub fn publication(&self, topic: &str) -> Option<Arc<Publication>> {
        self.publications.get(topic).map(|p| p.value().clone())
    }

    pub fn remove_publication(&self, topic: &str) -> Option<Arc<Publication>> {
        self.publications.remove(topic).map(|(_, p)| p)
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.publications.iter().map(|e| e.key().clone()).collect()
    }

    pub fn add_subscription(&self, entry: SubscriptionEntry) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.subscriptions.entry(entry.topic.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().topic_type != entry.topic_type {
                    return Err(TcprosError::Registration(format!(
                        "topic {} already subscribed as {}",
                        entry.topic,
                        existing.get().topic_type.type_name
                    )));
                }
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub fn subscription(&self, topic: &str) -> Option<SubscriptionEntry> {
        self.subscriptions.get(topic).map(|e| e.value().clone())
    }

    pub fn remove_subscription(&self, topic: &str) -> Option<SubscriptionEntry> {
        self.subscriptions.remove(topic).map(|(_, e)| e)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn add_service(&self, service: ServiceEntry) -> Result<Arc<ServiceEntry>> {
        use dashmap::mapref::entry::Entry;

        match self.services.entry(service.name().to_string()) {
            Entry::Occupied(_) => Err(TcprosError::Registration(format!(
                "service {} already advertised",
                service.name()
            ))),
            Entry::Vacant(slot) => Ok(slot.insert(Arc::new(service)).clone()),
        }
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.services.get(name).map(|s| s.value().clone())
    }

    pub fn remove_service(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.services.remove(name).map(|(_, s)| s)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }
}
