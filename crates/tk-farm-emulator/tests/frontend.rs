//! End-to-end checks of the frontend stack deployed onto a local cloud.

use std::sync::Arc;

use tk_farm_config::{RemovalPolicy, StackConfig};
use tk_farm_emulator::{CacheStatus, Caller, CloudError, LocalCloud, Scheme, distribution_arn};
use tk_farm_engine::{
  Action, ApplyError, ApplyReport, Deployment, Engine, Provider, ProviderError, ResourceRequest,
  plan,
};
use tk_farm_stack::{
  BUCKET_ID, CACHE_POLICY_ID, DEPLOY_USER_ID, FrontendStack, OUTPUT_BUCKET_NAME,
  OUTPUT_DEPLOY_USER_NAME, OUTPUT_DISTRIBUTION_DOMAIN_NAME, OUTPUT_DISTRIBUTION_ID, ResourceKind,
  Template, validate,
};
use tokio_util::sync::CancellationToken;

const INDEX: &str = "<!doctype html><title>tk-farm</title>";

fn cloud_for(config: &StackConfig) -> Arc<LocalCloud> {
  Arc::new(LocalCloud::new(&config.account_id, &config.region))
}

fn synth(config: &StackConfig) -> (String, Template) {
  let stack = FrontendStack::build(config).unwrap();
  (stack.name().to_string(), stack.synth().unwrap())
}

async fn deploy(
  cloud: &Arc<LocalCloud>,
  config: &StackConfig,
  previous: Option<&Deployment>,
) -> Result<ApplyReport, ApplyError> {
  let (stack_name, template) = synth(config);
  apply(cloud, &stack_name, &template, previous).await
}

async fn apply(
  cloud: &Arc<LocalCloud>,
  stack_name: &str,
  template: &Template,
  previous: Option<&Deployment>,
) -> Result<ApplyReport, ApplyError> {
  Engine::new(cloud.clone())
    .apply(stack_name, template, previous, CancellationToken::new())
    .await
}

/// Upload the site as the deploy user, the way CI does.
async fn upload_site(cloud: &LocalCloud, deployment: &Deployment) {
  let deployer = Caller::user(deployment.output(OUTPUT_DEPLOY_USER_NAME).unwrap());
  let bucket = deployment.output(OUTPUT_BUCKET_NAME).unwrap();
  cloud
    .put_object(&deployer, bucket, "index.html", INDEX, Some("text/html"))
    .await
    .unwrap();
  cloud
    .put_object(&deployer, bucket, "assets/app.js", "console.log(1)", Some("text/javascript"))
    .await
    .unwrap();
}

#[tokio::test]
async fn test_default_template_has_no_violations() {
  let (_, template) = synth(&StackConfig::default());
  assert!(validate(&template).is_empty());
}

#[tokio::test]
async fn test_first_deploy_creates_everything_and_resolves_outputs() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);

  let report = deploy(&cloud, &config, None).await.unwrap();
  assert_eq!(report.changes.len(), 7);
  assert!(report.changes.iter().all(|c| c.action == Action::Create));

  let deployment = &report.deployment;
  assert_eq!(deployment.output(OUTPUT_BUCKET_NAME), Some("tk-farm-frontend-123456789012"));
  assert_eq!(deployment.output(OUTPUT_DEPLOY_USER_NAME), Some("tk-farm-deploy-user"));

  let distribution_id = deployment.output(OUTPUT_DISTRIBUTION_ID).unwrap();
  let distribution = cloud.distribution(distribution_id).await.unwrap();
  assert_eq!(
    deployment.output(OUTPUT_DISTRIBUTION_DOMAIN_NAME),
    Some(distribution.domain_name.as_str())
  );
  assert!(distribution.origins[0].origin_access_control_id.is_some());
}

#[tokio::test]
async fn test_bucket_blocks_all_public_access() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  deploy(&cloud, &config, None).await.unwrap();

  let bucket = cloud.bucket(&config.bucket_name()).await.unwrap();
  assert!(bucket.public_access_block.all_blocked());
  assert!(bucket.auto_delete_objects);
}

#[tokio::test]
async fn test_source_arn_is_the_distributions_own_arn() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  let report = deploy(&cloud, &config, None).await.unwrap();

  let distribution_id = report.deployment.output(OUTPUT_DISTRIBUTION_ID).unwrap();
  let expected = distribution_arn(&config.account_id, distribution_id);

  let bucket = cloud.bucket(&config.bucket_name()).await.unwrap();
  let policy = bucket.policy.unwrap();
  assert_eq!(policy.statement.len(), 1);
  let source_arns = policy.statement[0].condition["StringEquals"]["AWS:SourceArn"].values();
  assert_eq!(source_arns, [expected]);
}

#[tokio::test]
async fn test_redeploying_unchanged_stack_is_a_noop() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  let first = deploy(&cloud, &config, None).await.unwrap();
  let before = cloud.snapshot().await;

  let (_, template) = synth(&config);
  let planned = plan(&template, Some(&first.deployment)).unwrap();
  assert_eq!(planned.count(Action::Unchanged), 7);

  let second = deploy(&cloud, &config, Some(&first.deployment)).await.unwrap();
  assert!(second.is_noop());
  assert_eq!(second.deployment.outputs, first.deployment.outputs);
  assert_eq!(cloud.snapshot().await, before);
}

#[tokio::test]
async fn test_unknown_paths_fall_back_to_the_root_document() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  let report = deploy(&cloud, &config, None).await.unwrap();
  upload_site(&cloud, &report.deployment).await;
  let domain = report.deployment.output(OUTPUT_DISTRIBUTION_DOMAIN_NAME).unwrap();

  let root = cloud.request(domain, Scheme::Https, "/").await.unwrap();
  assert_eq!(root.status, 200);
  assert_eq!(root.text(), INDEX);
  assert_eq!(root.content_type.as_deref(), Some("text/html"));

  let route = cloud.request(domain, Scheme::Https, "/farms/42/settings").await.unwrap();
  assert_eq!(route.status, 200);
  assert_eq!(route.text(), INDEX);

  let asset = cloud.request(domain, Scheme::Https, "/assets/app.js").await.unwrap();
  assert_eq!(asset.status, 200);
  assert_eq!(asset.text(), "console.log(1)");
}

#[tokio::test]
async fn test_plain_http_is_redirected() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  let report = deploy(&cloud, &config, None).await.unwrap();
  upload_site(&cloud, &report.deployment).await;
  let domain = report.deployment.output(OUTPUT_DISTRIBUTION_DOMAIN_NAME).unwrap();

  let hits = cloud.origin_hits();
  let response = cloud.request(domain, Scheme::Http, "/index.html").await.unwrap();
  assert_eq!(response.status, 301);
  assert_eq!(
    response.location.as_deref(),
    Some(format!("https://{}/index.html", domain).as_str())
  );
  assert!(response.body.is_empty());
  assert_eq!(cloud.origin_hits(), hits);
}

#[tokio::test]
async fn test_deploy_policy_grants_exactly_the_publishing_actions() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  let report = deploy(&cloud, &config, None).await.unwrap();

  let policies = cloud.user_policies(&config.deploy_user_name()).await;
  assert_eq!(policies.len(), 1);

  let mut actions: Vec<&str> = policies[0]
    .document
    .statement
    .iter()
    .flat_map(|s| s.action.values())
    .map(String::as_str)
    .collect();
  actions.sort();
  assert_eq!(
    actions,
    vec![
      "cloudfront:CreateInvalidation",
      "s3:DeleteObject",
      "s3:ListBucket",
      "s3:PutObject",
      "s3:PutObjectAcl",
    ]
  );

  let distribution_id = report.deployment.output(OUTPUT_DISTRIBUTION_ID).unwrap();
  let mut resources: Vec<String> = policies[0]
    .document
    .statement
    .iter()
    .flat_map(|s| s.resource.values().to_vec())
    .collect();
  resources.sort();
  assert_eq!(
    resources,
    vec![
      distribution_arn(&config.account_id, distribution_id),
      format!("arn:aws:s3:::{}", config.bucket_name()),
      format!("arn:aws:s3:::{}/*", config.bucket_name()),
    ]
  );
}

#[tokio::test]
async fn test_only_the_distribution_reads_the_bucket() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  let report = deploy(&cloud, &config, None).await.unwrap();
  upload_site(&cloud, &report.deployment).await;
  let bucket = config.bucket_name();

  let deployer = Caller::user(config.deploy_user_name());
  for caller in [Caller::Anonymous, deployer] {
    let err = cloud.get_object(&caller, &bucket, "index.html").await.unwrap_err();
    assert!(matches!(err, CloudError::AccessDenied { .. }));
  }

  let impostor = Caller::Service {
    service: "cloudfront.amazonaws.com".to_string(),
    source_arn: distribution_arn(&config.account_id, "EOTHERDISTRIB1"),
  };
  let err = cloud.get_object(&impostor, &bucket, "index.html").await.unwrap_err();
  assert!(matches!(err, CloudError::AccessDenied { .. }));
}

#[tokio::test]
async fn test_zero_ttls_send_every_fetch_to_the_origin() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  let report = deploy(&cloud, &config, None).await.unwrap();
  upload_site(&cloud, &report.deployment).await;
  let domain = report.deployment.output(OUTPUT_DISTRIBUTION_DOMAIN_NAME).unwrap();

  let hits = cloud.origin_hits();
  let first = cloud.request(domain, Scheme::Https, "/index.html").await.unwrap();
  let second = cloud.request(domain, Scheme::Https, "/index.html").await.unwrap();
  assert_eq!(first.cache, CacheStatus::Miss);
  assert_eq!(second.cache, CacheStatus::Miss);
  assert_eq!(cloud.origin_hits(), hits + 2);
}

#[tokio::test]
async fn test_cached_content_is_evicted_by_invalidation() {
  // The frontend stack never caches, so turn caching on in the template to
  // exercise the edge.
  let config = StackConfig::default();
  let (stack_name, mut template) = synth(&config);
  let ttls = &mut template.resources.get_mut(CACHE_POLICY_ID).unwrap().properties
    ["CachePolicyConfig"];
  ttls["DefaultTTL"] = serde_json::json!(300);
  ttls["MaxTTL"] = serde_json::json!(3600);
  assert!(!validate(&template).is_empty());

  let cloud = cloud_for(&config);
  let report = apply(&cloud, &stack_name, &template, None).await.unwrap();
  upload_site(&cloud, &report.deployment).await;
  let deployment = &report.deployment;
  let domain = deployment.output(OUTPUT_DISTRIBUTION_DOMAIN_NAME).unwrap();

  cloud.request(domain, Scheme::Https, "/").await.unwrap();
  let cached = cloud.request(domain, Scheme::Https, "/").await.unwrap();
  assert_eq!(cached.cache, CacheStatus::Hit);

  let deployer = Caller::user(config.deploy_user_name());
  cloud
    .put_object(&deployer, &config.bucket_name(), "index.html", "v2", Some("text/html"))
    .await
    .unwrap();
  let stale = cloud.request(domain, Scheme::Https, "/").await.unwrap();
  assert_eq!(stale.text(), INDEX);

  let distribution_id = deployment.output(OUTPUT_DISTRIBUTION_ID).unwrap();
  cloud
    .create_invalidation(&deployer, distribution_id, &["/*"])
    .await
    .unwrap();
  let fresh = cloud.request(domain, Scheme::Https, "/").await.unwrap();
  assert_eq!(fresh.cache, CacheStatus::Miss);
  assert_eq!(fresh.text(), "v2");
}

#[tokio::test]
async fn test_failed_deploy_leaves_nothing_behind() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);

  // Someone already owns the deploy user's name.
  cloud
    .create(&ResourceRequest {
      logical_id: "Squatter".to_string(),
      kind: ResourceKind::User,
      properties: serde_json::json!({ "UserName": config.deploy_user_name() }),
    })
    .await
    .unwrap();

  let err = deploy(&cloud, &config, None).await.unwrap_err();
  match err {
    ApplyError::Provider {
      logical_id,
      action,
      source,
    } => {
      assert_eq!(logical_id, DEPLOY_USER_ID);
      assert_eq!(action, Action::Create);
      assert!(matches!(source, ProviderError::AlreadyExists { .. }));
    }
    other => panic!("unexpected error: {other}"),
  }

  let state = cloud.snapshot().await;
  assert!(state.buckets.is_empty());
  assert!(state.origin_access_controls.is_empty());
  assert!(state.cache_policies.is_empty());
  assert!(state.distributions.is_empty());
  assert!(state.policies.is_empty());
  assert_eq!(state.users.len(), 1);
}

#[tokio::test]
async fn test_destroy_empties_and_removes_everything() {
  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  let report = deploy(&cloud, &config, None).await.unwrap();
  upload_site(&cloud, &report.deployment).await;

  let mut deployment = report.deployment;
  let destroyed = Engine::new(cloud.clone())
    .destroy(&mut deployment, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(destroyed.deleted.len(), 7);
  assert!(deployment.is_empty());

  let state = cloud.snapshot().await;
  assert!(state.buckets.is_empty());
  assert!(state.distributions.is_empty());
  assert!(state.users.is_empty());
  assert!(state.policies.is_empty());
}

#[tokio::test]
async fn test_retained_bucket_survives_destroy() {
  let config = StackConfig {
    removal_policy: RemovalPolicy::Retain,
    auto_delete_objects: false,
    ..StackConfig::default()
  };
  let cloud = cloud_for(&config);
  let report = deploy(&cloud, &config, None).await.unwrap();
  upload_site(&cloud, &report.deployment).await;

  let mut deployment = report.deployment;
  let destroyed = Engine::new(cloud.clone())
    .destroy(&mut deployment, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(destroyed.retained, vec![BUCKET_ID.to_string()]);

  let bucket = cloud.bucket(&config.bucket_name()).await.unwrap();
  assert_eq!(bucket.objects.len(), 2);
  assert!(bucket.policy.is_none());
}

#[tokio::test]
async fn test_state_survives_a_cloud_snapshot() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("cloud.json");

  let config = StackConfig::default();
  let cloud = cloud_for(&config);
  let report = deploy(&cloud, &config, None).await.unwrap();
  upload_site(&cloud, &report.deployment).await;
  cloud.save(&path).await.unwrap();

  let restored = Arc::new(LocalCloud::load(&path).await.unwrap().unwrap());
  let domain = report.deployment.output(OUTPUT_DISTRIBUTION_DOMAIN_NAME).unwrap();
  let response = restored.request(domain, Scheme::Https, "/").await.unwrap();
  assert_eq!(response.text(), INDEX);

  let again = deploy(&restored, &config, Some(&report.deployment)).await.unwrap();
  assert!(again.is_noop());
}
