use crate::types::{AppError, Result};
use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        point_id::PointIdOptions, CreateCollectionBuilder, DeletePointsBuilder, Distance, PointId,
        PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;
use tracing::info;

use super::vectorstore::VectorIndex;

/// Qdrant-backed vector index.
///
/// Points are keyed by the numeric relational id and carry no payload; the
/// relational store holds everything else.
pub struct QdrantVectorIndex {
    client: Qdrant,
}

impl QdrantVectorIndex {
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self> {
        let builder = match api_key {
            Some(key) => Qdrant::from_url(url).api_key(key),
            None => Qdrant::from_url(url),
        };
        let client = builder
            .build()
            .map_err(|e| AppError::VectorIndex(format!("Failed to create Qdrant client: {}", e)))?;

        Ok(Self { client })
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| AppError::VectorIndex(format!("Failed to list collections: {}", e)))?;

        Ok(collections.collections.iter().any(|c| c.name == name))
    }

    fn point_ids(ids: &[u64]) -> Vec<PointId> {
        ids.iter()
            .map(|id| PointId {
                point_id_options: Some(PointIdOptions::Num(*id)),
            })
            .collect()
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    fn provider_name(&self) -> &'static str {
        "qdrant"
    }

    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<()> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| AppError::VectorIndex(format!("Failed to create collection: {}", e)))?;

        info!(collection, dimensions, "Created Qdrant collection");
        Ok(())
    }

    async fn insert_batch(&self, collection: &str, points: &[(u64, Vec<f32>)]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = points
            .iter()
            .map(|(id, vector)| {
                PointStruct::new(*id, vector.clone(), HashMap::<String, Value>::new())
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(|e| AppError::VectorIndex(format!("Failed to upsert points: {}", e)))?;

        Ok(())
    }

    async fn delete_batch(&self, collection: &str, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(Self::point_ids(ids))
                    .wait(true),
            )
            .await
            .map_err(|e| AppError::VectorIndex(format!("Failed to delete points: {}", e)))?;

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(u64, f32)>> {
        let response = self
            .client
            .search_points(SearchPointsBuilder::new(
                collection,
                query.to_vec(),
                top_k as u64,
            ))
            .await
            .map_err(|e| AppError::VectorIndex(format!("Failed to search: {}", e)))?;

        let mut hits: Vec<(u64, f32)> = response
            .result
            .into_iter()
            .filter_map(|point| match point.id?.point_id_options? {
                PointIdOptions::Num(id) => Some((id, point.score)),
                PointIdOptions::Uuid(_) => None,
            })
            .collect();

        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let info = self
            .client
            .collection_info(collection)
            .await
            .map_err(|e| AppError::VectorIndex(format!("Failed to get collection info: {}", e)))?;

        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0) as usize)
    }
}
