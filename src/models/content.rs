//! Catalog of the per-website content tables.

pub const WEBSITES: &str = "websites";
pub const SECTION_SETTINGS: &str = "section_settings";

/// Every content row is scoped to its website through this column.
pub const TENANT_COLUMN: &str = "website_id";

/// Columns owned by the store rather than by the content itself.
pub const SYSTEM_COLUMNS: [&str; 4] = ["id", TENANT_COLUMN, "created_at", "updated_at"];

/// Tables holding at most one row per website.
pub const SINGLETON_TABLES: [&str; 15] = [
    "site_theme",
    "navbar",
    "hero",
    "about",
    "why_choose_us",
    "menu_section_config",
    "contact_info",
    "instagram_feed",
    "footer",
    "testimonials_config",
    "faq_config",
    "reservation_config",
    "featured_products_config",
    "special_offers_config",
    "chat_support_config",
];

/// Collections with no references to other content rows.
pub const INDEPENDENT_COLLECTIONS: [&str; 3] = ["team_members", "products", "testimonials"];

/// A parent/child pair where the child points at the parent by id.
#[derive(Debug, Clone, Copy)]
pub struct Hierarchy {
    pub parent: &'static str,
    pub child: &'static str,
    pub foreign_key: &'static str,
}

pub const HIERARCHIES: [Hierarchy; 2] = [
    Hierarchy {
        parent: "menu_categories",
        child: "menu_items",
        foreign_key: "category_id",
    },
    Hierarchy {
        parent: "faq_categories",
        child: "faqs",
        foreign_key: "category_id",
    },
];
