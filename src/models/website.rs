use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TenantId = Uuid;

/// Subdomain of the website whose content seeds every new website.
pub const DEFAULT_TEMPLATE_SUBDOMAIN: &str = "template";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Website {
    pub id: TenantId,
    pub subdomain: String,
    pub display_title: String,
    pub is_active: bool,
}

/// A toggleable region of a website's public page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    Hero,
    About,
    WhyChooseUs,
    Team,
    FeaturedProducts,
    Menu,
    Reservation,
    Testimonials,
    SpecialOffers,
    Faq,
    Contact,
    InstagramFeed,
}

impl Section {
    /// All recognized sections in default page order.
    pub const ALL: [Section; 12] = [
        Section::Hero,
        Section::About,
        Section::WhyChooseUs,
        Section::Team,
        Section::FeaturedProducts,
        Section::Menu,
        Section::Reservation,
        Section::Testimonials,
        Section::SpecialOffers,
        Section::Faq,
        Section::Contact,
        Section::InstagramFeed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Hero => "hero",
            Section::About => "about",
            Section::WhyChooseUs => "whyChooseUs",
            Section::Team => "team",
            Section::FeaturedProducts => "featuredProducts",
            Section::Menu => "menu",
            Section::Reservation => "reservation",
            Section::Testimonials => "testimonials",
            Section::SpecialOffers => "specialOffers",
            Section::Faq => "faq",
            Section::Contact => "contact",
            Section::InstagramFeed => "instagramFeed",
        }
    }

    /// Position in `ALL`, used as the default `display_order`.
    pub fn default_order(self) -> i32 {
        Section::ALL.iter().position(|s| *s == self).unwrap_or(0) as i32
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown section: {0}")]
pub struct UnknownSection(pub String);

impl FromStr for Section {
    type Err = UnknownSection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| UnknownSection(s.to_string()))
    }
}

/// One row of `section_settings`; at most one exists per (website, section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionFlag {
    pub id: Uuid,
    pub website_id: TenantId,
    pub section_name: String,
    pub is_enabled: bool,
    pub display_order: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_names_round_trip_through_from_str() {
        for section in Section::ALL {
            assert_eq!(section.as_str().parse::<Section>(), Ok(section));
        }
        assert!("Hero".parse::<Section>().is_err());
        assert!("blog".parse::<Section>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Section::WhyChooseUs).unwrap();
        assert_eq!(json, "\"whyChooseUs\"");
        let parsed: Section = serde_json::from_str("\"instagramFeed\"").unwrap();
        assert_eq!(parsed, Section::InstagramFeed);
    }

    #[test]
    fn default_order_follows_page_order() {
        assert_eq!(Section::Hero.default_order(), 0);
        assert_eq!(Section::InstagramFeed.default_order(), 11);
    }
}
