use tracing::{debug, warn};

use crate::container::{ContainerType, JoinField, QueryContainer};
use crate::description::{Description, SMW_NS_CONCEPT};
use crate::parser::parse_query;
use crate::store::{ConceptCacheRow, CONCEPT_CACHE_TABLE};

use super::{CompileMessage, ConceptCacheMode, CompilerSettings, DescriptionCompiler, QueryBuilder};

/// Compiles `[[Concept:…]]` conditions.
///
/// A cached concept is answered from the concept cache table. An uncached
/// or stale concept is expanded from its stored query text when the
/// configuration allows computing it.
pub struct ConceptDescriptionCompiler;

impl DescriptionCompiler for ConceptDescriptionCompiler {
    fn can_compile_description(&self, description: &Description) -> bool {
        matches!(description, Description::Concept(_))
    }

    fn compile_description(
        &self,
        builder: &mut QueryBuilder<'_>,
        description: &Description,
    ) -> QueryContainer {
        let Description::Concept(concept) = description else {
            unreachable!("concept compiler called with {:?}", description)
        };

        let mut query = builder.new_container();
        query.set_empty_result();

        let store = builder.store();
        let cid = store.get_smw_page_id(
            &concept.dbkey,
            SMW_NS_CONCEPT,
            &concept.interwiki,
            &concept.subobject,
        );
        if cid == 0 {
            return query;
        }
        let Some(row) = store.concept_cache_row(cid) else {
            return query;
        };
        let name = concept.title_text();

        let may_be_computed = may_be_computed(builder.settings(), &row);
        let lifetime = builder.settings().concept_cache_lifetime_minutes * 60;

        if let Some(cache_date) = row.cache_date.filter(|d| *d != 0) {
            if cache_date > builder.now() - lifetime || !may_be_computed {
                debug!(concept = %name, cache_date, "concept answered from cache");
                let db = store.database();
                query.container_type = ContainerType::Table;
                query.jointable = db.table_name(CONCEPT_CACHE_TABLE);
                query.joinfield = JoinField::Column(format!("{}.s_id", query.alias));
                query.add_where(format!(
                    "{}.o_id={}",
                    query.alias,
                    db.add_quotes(&cid.to_string())
                ));
                return query;
            }
        }

        let Some(text) = row.concept_txt.as_deref().filter(|t| !t.is_empty()) else {
            return query;
        };

        if !may_be_computed {
            builder.add_error(CompileMessage::ConceptCacheMiss(name));
            return query;
        }

        let sub = match parse_query(&unescape_concept_text(text)) {
            Ok(sub) => sub,
            Err(e) => {
                warn!(concept = %name, error = %e, "concept text does not parse");
                builder.add_error(CompileMessage::UnparsableConcept(name));
                return query;
            }
        };

        if !builder.enter_concept(cid) {
            builder.add_error(CompileMessage::CircularConcept(name));
            return query;
        }
        let compiled = builder.compile_description(&sub);
        builder.leave_concept();

        if compiled.container_type == ContainerType::NoQuery {
            builder.add_error(CompileMessage::EmptySubquery(name));
            return query;
        }
        debug!(concept = %name, alias = %compiled.alias, "concept computed from its query");
        compiled
    }
}

/// Whether a concept may be evaluated from its query text right now.
fn may_be_computed(settings: &CompilerSettings, row: &ConceptCacheRow) -> bool {
    match settings.concept_cache {
        ConceptCacheMode::None => true,
        ConceptCacheMode::Hard => {
            row.concept_features & !settings.features == 0
                && row.concept_size <= settings.max_size
                && row.concept_depth <= settings.max_depth
        }
        ConceptCacheMode::All => false,
    }
}

/// Escape query text for storage in the concept table.
pub fn escape_concept_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Inverse of [`escape_concept_text`].
pub fn unescape_concept_text(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
