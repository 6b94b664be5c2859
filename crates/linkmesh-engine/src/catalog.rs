//! Sites, articles and platforms.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use linkmesh_core::{
  content::{Article, Derivative, DistributionStatus, Platform, Site},
  domain::base_domain,
  store::LinkStore,
  tier::Tier,
};

use crate::{Backends, Engine, Error, Result, error::store_err};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSite {
  pub user_id: Uuid,
  pub name:    String,
  pub domain:  String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
  pub site_id:            Uuid,
  pub title:              String,
  pub body:               String,
  pub primary_keyword:    String,
  #[serde(default)]
  pub secondary_keywords: Vec<String>,
  pub target_url:         String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlatform {
  /// Supplied to replace an existing platform; generated otherwise.
  #[serde(default)]
  pub platform_id: Option<Uuid>,
  pub name:        String,
  pub url:         String,
  pub tier:        Tier,
  pub category:    String,
  pub authority:   u32,
  #[serde(default = "default_true")]
  pub active:      bool,
}

fn default_true() -> bool { true }

impl<B: Backends> Engine<B> {
  pub async fn create_site(&self, new: NewSite) -> Result<Site> {
    if new.name.trim().is_empty() {
      return Err(Error::InvalidInput("site name is empty".into()));
    }
    let site = Site {
      site_id:    Uuid::new_v4(),
      user_id:    new.user_id,
      name:       new.name.trim().to_owned(),
      domain:     base_domain(&new.domain)?,
      created_at: self.now(),
    };
    let site = self.store.insert_site(site).await.map_err(store_err)?;
    info!(site_id = %site.site_id, domain = %site.domain, "site created");
    Ok(site)
  }

  pub async fn get_site(&self, site_id: Uuid) -> Result<Site> {
    self
      .store
      .get_site(site_id)
      .await
      .map_err(store_err)?
      .ok_or(Error::SiteNotFound(site_id))
  }

  /// Create an article under an existing site; the owner is the site's.
  pub async fn create_article(&self, new: NewArticle) -> Result<Article> {
    let site = self.get_site(new.site_id).await?;
    base_domain(&new.target_url)?;
    if new.title.trim().is_empty() {
      return Err(Error::InvalidInput("article title is empty".into()));
    }

    let article = Article {
      article_id:          Uuid::new_v4(),
      site_id:             site.site_id,
      user_id:             site.user_id,
      title:               new.title,
      body:                new.body,
      primary_keyword:     new.primary_keyword,
      secondary_keywords:  new.secondary_keywords,
      target_url:          new.target_url,
      distribution_status: DistributionStatus::NotStarted,
      created_at:          self.now(),
    };
    let article = self.store.insert_article(article).await.map_err(store_err)?;
    info!(article_id = %article.article_id, site_id = %site.site_id, "article created");
    Ok(article)
  }

  pub async fn get_article(&self, article_id: Uuid) -> Result<Article> {
    self
      .store
      .get_article(article_id)
      .await
      .map_err(store_err)?
      .ok_or(Error::ArticleNotFound(article_id))
  }

  pub async fn list_derivatives(&self, article_id: Uuid) -> Result<Vec<Derivative>> {
    self.get_article(article_id).await?;
    self
      .store
      .list_derivatives(article_id)
      .await
      .map_err(store_err)
  }

  pub async fn upsert_platform(&self, new: NewPlatform) -> Result<Platform> {
    base_domain(&new.url)?;
    if new.authority > 100 {
      return Err(Error::InvalidInput(format!(
        "platform authority {} is above 100",
        new.authority
      )));
    }
    let platform = Platform {
      platform_id: new.platform_id.unwrap_or_else(Uuid::new_v4),
      name:        new.name,
      url:         new.url,
      tier:        new.tier,
      category:    new.category,
      authority:   new.authority,
      active:      new.active,
    };
    self.store.upsert_platform(platform).await.map_err(store_err)
  }

  pub async fn list_platforms(
    &self,
    tier: Option<Tier>,
    active_only: bool,
  ) -> Result<Vec<Platform>> {
    self
      .store
      .list_platforms(tier, active_only)
      .await
      .map_err(store_err)
  }
}
