mod common;

use std::collections::BTreeSet;

use content_blocks::{
    application::{
        content_blocks::ContentBlocksConfig,
        editor::BlockChanges,
        error::AppError,
        filters::BlockSubset,
        repos::{BlocksRepo, BlocksWriteRepo},
    },
    cache::{BulkReport, CacheStore},
    domain::{
        entities::{ParentRef, Site, SiteRelation},
        fields::FieldValue,
        types::FieldType,
    },
};
use common::{Harness, memory_config, object};
use serde_json::json;

fn collection(harness: &Harness, slug: &str, sites: SiteRelation) -> ParentRef {
    harness.repo.add_parent("collection", slug, slug, sites)
}

fn stored_keys(harness: &Harness) -> BTreeSet<String> {
    harness
        .store
        .keys()
        .into_iter()
        .map(|key| key.as_str().to_string())
        .collect()
}

#[tokio::test]
async fn cacheable_block_renders_once_then_hits() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    harness.field(&card, "title", FieldType::Text).await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let block = harness.published(&parent, &card).await;

    let first = harness
        .app
        .render_content_block(block.id, None)
        .await
        .expect("first render");
    let second = harness
        .app
        .render_content_block(block.id, None)
        .await
        .expect("second render");

    assert_eq!(first, second);
    assert!(first.starts_with("[content_blocks/content_blocks/card.html|site=none|"));
    assert_eq!(harness.renderer.count(), 1);
    assert_eq!(
        stored_keys(&harness),
        BTreeSet::from([format!("content_blocks_{}", block.id)])
    );
}

#[tokio::test]
async fn stored_entry_wins_over_fresh_render() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let block = harness.published(&parent, &card).await;

    let key = harness.app.cache().cache_key(block.id, None);
    harness
        .store
        .set(&key, "<p>stale</p>")
        .await
        .expect("seed entry");

    let html = harness
        .app
        .render_content_block(block.id, None)
        .await
        .expect("render");
    assert_eq!(html, "<p>stale</p>");
    assert_eq!(harness.renderer.count(), 0);
}

#[tokio::test]
async fn drafts_nested_and_uncached_templates_are_never_stored() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    let section = harness.template("Section", "section.html").await;
    harness.nested_field(&section, "items", &[card.id], 1).await;
    let plain = harness.uncached_template("Plain", "plain.html").await;
    let gone = harness.template("Gone", "missing.html").await;
    let blank = harness.template("Blank", "  ").await;
    let parent = collection(&harness, "home", SiteRelation::Absent);

    let draft = harness.draft(&parent, &card).await;
    let uncached = harness.published(&parent, &plain).await;
    let missing = harness.published(&parent, &gone).await;
    let unnamed = harness.published(&parent, &blank).await;
    let root = harness.published(&parent, &section).await;

    let loader = harness.app.loader();
    let root_node = loader.load(root.id).await.expect("load root");
    let child = root_node.field("items").expect("items field").children[0].clone();

    for id in [draft.id, uncached.id, missing.id, unnamed.id, child.id()] {
        let node = loader.load(id).await.expect("load block");
        assert!(!harness.app.cache().can_cache(&node), "block {id} is cacheable");
        harness
            .app
            .render_content_block(id, None)
            .await
            .expect("render");
    }
    assert!(harness.app.cache().can_cache(&root_node));
    assert!(harness.store.is_empty());

    let html = harness
        .app
        .render_content_block(missing.id, None)
        .await
        .expect("render missing template");
    assert_eq!(html, "");
    let html = harness
        .app
        .render_content_block(unnamed.id, None)
        .await
        .expect("render unnamed template");
    assert_eq!(html, "");
}

#[tokio::test]
async fn disabled_cache_renders_directly() {
    let mut config = memory_config();
    config.cache.disabled = true;
    let harness = Harness::with_config(config);
    let card = harness.template("Card", "card.html").await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let block = harness.published(&parent, &card).await;

    for _ in 0..2 {
        harness
            .app
            .render_content_block(block.id, None)
            .await
            .expect("render");
    }
    assert_eq!(harness.renderer.count(), 2);
    assert!(harness.store.is_empty());

    let report = harness
        .app
        .cache()
        .get_or_set_cache_all()
        .await
        .expect("bulk populate");
    assert_eq!(report, BulkReport::default());
}

#[tokio::test]
async fn saving_a_nested_block_refreshes_its_root_entry() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    harness.field(&card, "title", FieldType::Text).await;
    let section = harness.template("Section", "section.html").await;
    harness.nested_field(&section, "items", &[card.id], 1).await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let root = harness.published(&parent, &section).await;

    let before = harness
        .app
        .render_content_block(root.id, None)
        .await
        .expect("render root");
    assert!(!before.contains("Hello"));

    let node = harness.app.loader().load(root.id).await.expect("load root");
    let child = node.field("items").expect("items").children[0].id();
    let mut values = serde_json::Map::new();
    values.insert("title".to_string(), json!("Hello"));
    harness
        .app
        .editor()
        .save_block(
            child,
            BlockChanges {
                values,
                ..Default::default()
            },
        )
        .await
        .expect("save child");

    let cached = harness
        .app
        .cache()
        .get_cache(root.id, None)
        .await
        .expect("read cache")
        .expect("root entry present");
    assert!(cached.contains("Hello"), "root entry not refreshed: {cached}");
    assert!(
        harness
            .app
            .cache()
            .get_cache(child, None)
            .await
            .expect("read cache")
            .is_none()
    );
}

#[tokio::test]
async fn update_cache_walks_up_to_the_root() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    harness.field(&card, "title", FieldType::Text).await;
    let section = harness.template("Section", "section.html").await;
    harness.nested_field(&section, "items", &[card.id], 1).await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let root = harness.published(&parent, &section).await;

    harness
        .app
        .render_content_block(root.id, None)
        .await
        .expect("render root");

    let node = harness.app.loader().load(root.id).await.expect("load root");
    let mut child = node.field("items").expect("items").children[0].block.clone();
    child.saved = true;
    harness.repo.update_block(&child).await.expect("save child");
    let mut title = harness
        .repo
        .list_fields(child.id)
        .await
        .expect("child fields")
        .remove(0);
    title.value = FieldValue::Text("Direct".to_string());
    harness.repo.update_field(&title).await.expect("update field");

    let stale = harness
        .app
        .cache()
        .get_cache(root.id, None)
        .await
        .expect("read cache")
        .expect("root entry present");
    assert!(!stale.contains("Direct"));

    harness
        .app
        .cache()
        .update_cache(child.id, None, None)
        .await
        .expect("update cache");

    let fresh = harness
        .app
        .cache()
        .get_cache(root.id, None)
        .await
        .expect("read cache")
        .expect("root entry present");
    assert!(fresh.contains("Direct"));
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn delete_cache_drops_ancestor_entries() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    let section = harness.template("Section", "section.html").await;
    harness.nested_field(&section, "items", &[card.id], 1).await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let root = harness.published(&parent, &section).await;

    harness
        .app
        .render_content_block(root.id, None)
        .await
        .expect("render root");
    assert_eq!(harness.store.len(), 1);

    let node = harness.app.loader().load(root.id).await.expect("load root");
    let child = node.field("items").expect("items").children[0].block.clone();
    harness
        .app
        .cache()
        .delete_cache(&child, None)
        .await
        .expect("delete cache");

    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn parent_sites_fan_out_into_separate_entries() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    let sites: Vec<Site> = ["a.test", "b.test", "c.test"]
        .into_iter()
        .map(|domain| harness.repo.add_site(domain, domain))
        .collect();
    let multi = collection(&harness, "multi", SiteRelation::Many(sites.clone()));
    let unset = collection(&harness, "unset", SiteRelation::Single(None));
    let empty = collection(&harness, "empty", SiteRelation::Many(Vec::new()));

    let shared = harness.published(&multi, &card).await;
    let single = harness.published(&unset, &card).await;
    harness.published(&empty, &card).await;

    let report = harness
        .app
        .cache()
        .get_or_set_cache_all()
        .await
        .expect("bulk populate");
    assert_eq!(report.parents, 3);
    assert_eq!(report.blocks, 3);
    assert_eq!(report.unrenderable, 0);

    let mut expected: BTreeSet<String> = sites
        .iter()
        .map(|site| format!("content_blocks_{}_site_{}", shared.id, site.id))
        .collect();
    expected.insert(format!("content_blocks_{}", single.id));
    assert_eq!(stored_keys(&harness), expected);

    for site in &sites {
        let html = harness
            .app
            .cache()
            .get_cache(shared.id, Some(site))
            .await
            .expect("read cache")
            .expect("site entry present");
        assert!(html.contains(&format!("site={}", site.id)));
    }
}

#[tokio::test]
async fn request_site_in_context_selects_the_site_entry() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    let site = harness.repo.add_site("a.test", "A");
    let parent = collection(&harness, "home", SiteRelation::Single(Some(site.clone())));
    let block = harness.published(&parent, &card).await;

    let context = object(json!({ "request": { "site": site } }));
    let html = harness
        .app
        .render_content_block(block.id, Some(context))
        .await
        .expect("render with site");

    assert!(html.contains(&format!("site={}", site.id)));
    assert_eq!(
        stored_keys(&harness),
        BTreeSet::from([format!("content_blocks_{}_site_{}", block.id, site.id)])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_share_one_render() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let block = harness.published(&parent, &card).await.id;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let app = harness.app.clone();
        tasks.push(tokio::spawn(async move {
            app.render_content_block(block, None).await
        }));
    }

    let mut outputs = BTreeSet::new();
    for task in tasks {
        outputs.insert(task.await.expect("join").expect("render"));
    }

    assert_eq!(outputs.len(), 1);
    assert_eq!(harness.renderer.count(), 1);
}

#[tokio::test]
async fn bulk_population_propagates_render_errors() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    let broken = harness.template("Broken", "broken.html").await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    harness.published(&parent, &card).await;
    harness.published(&parent, &broken).await;

    let set = harness
        .app
        .cache()
        .set_cache_all(&BlockSubset::all())
        .await;
    assert!(matches!(set, Err(AppError::Render(_))), "got {set:?}");

    let populate = harness.app.cache().get_or_set_cache_all().await;
    assert!(matches!(populate, Err(AppError::Render(_))), "got {populate:?}");
}

#[tokio::test]
async fn bulk_operations_skip_blocks_whose_template_is_gone() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    let gone = harness.template("Gone", "gone.html").await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let good = harness.published(&parent, &card).await;
    harness.published(&parent, &gone).await;
    harness.draft(&parent, &card).await;
    harness
        .renderer
        .remove("content_blocks/content_blocks/gone.html");

    let report = harness
        .app
        .cache()
        .set_cache_all(&BlockSubset::all())
        .await
        .expect("bulk set");
    assert_eq!(
        report,
        BulkReport {
            parents: 1,
            blocks: 1,
            unrenderable: 1,
        }
    );
    assert_eq!(
        stored_keys(&harness),
        BTreeSet::from([format!("content_blocks_{}", good.id)])
    );

    let report = harness
        .app
        .cache()
        .delete_cache_all()
        .await
        .expect("bulk delete");
    assert_eq!(report.blocks, 2);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn deep_nesting_renders_each_block_once() {
    const DEPTH: usize = 8;
    let harness = Harness::new();
    let mut levels = Vec::with_capacity(DEPTH);
    for level in 0..DEPTH {
        let template = harness
            .template(&format!("Level{level}"), &format!("level{level}.html"))
            .await;
        harness.field(&template, "title", FieldType::Text).await;
        levels.push(template);
    }
    for pair in levels.windows(2) {
        harness
            .nested_field(&pair[0], "items", &[pair[1].id], 1)
            .await;
    }
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let root = harness.published(&parent, &levels[0]).await;

    let node = harness.app.loader().load(root.id).await.expect("load root");
    for id in node.subtree_ids() {
        let mut block = harness
            .repo
            .find_block(id)
            .await
            .expect("find block")
            .expect("block exists");
        block.saved = true;
        harness.repo.update_block(&block).await.expect("save block");
    }
    let node = harness.app.loader().load(root.id).await.expect("reload root");
    assert_eq!(node.depth(), DEPTH);

    harness
        .app
        .render_content_block(root.id, None)
        .await
        .expect("render root");
    assert_eq!(harness.renderer.count(), DEPTH);
}

#[tokio::test]
async fn set_cache_all_honours_the_subset() {
    let harness = Harness::new();
    let card = harness.template("Card", "card.html").await;
    let parent = collection(&harness, "home", SiteRelation::Absent);
    let first = harness.published(&parent, &card).await;
    harness.published(&parent, &card).await;

    let report = harness
        .app
        .cache()
        .set_cache_all(&BlockSubset::only([first.id]))
        .await
        .expect("bulk set");

    assert_eq!(report.blocks, 1);
    assert_eq!(
        stored_keys(&harness),
        BTreeSet::from([format!("content_blocks_{}", first.id)])
    );
}

#[tokio::test]
async fn unregistered_parent_kinds_are_not_visited() {
    let config = ContentBlocksConfig {
        parent_kinds: vec!["page".to_string()],
        ..memory_config()
    };
    let harness = Harness::with_config(config);
    let card = harness.template("Card", "card.html").await;
    let collection_parent = collection(&harness, "home", SiteRelation::Absent);
    let page = harness
        .repo
        .add_parent("page", "About", "about", SiteRelation::Absent);
    harness.published(&collection_parent, &card).await;
    let on_page = harness.published(&page, &card).await;

    let report = harness
        .app
        .cache()
        .get_or_set_cache_all()
        .await
        .expect("bulk populate");

    assert_eq!(report.parents, 1);
    assert_eq!(
        stored_keys(&harness),
        BTreeSet::from([format!("content_blocks_{}", on_page.id)])
    );
}
