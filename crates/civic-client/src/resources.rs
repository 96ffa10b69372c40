//! Typed CRUD over the portal's resource collections
//!
//! List endpoints answer in one of three shapes depending on the backend
//! module: a bare array, a Spring page (`content`), or a `data` wrapper.
//! [`Listing`] accepts exactly those shapes and rejects anything else.

use crate::client::AuthenticatedHttpClient;
use crate::error::ClientError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;

/// Backend resource collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Hotels
    Hotels,
    /// Hotel bookings
    HotelBookings,
    /// Restaurants
    Restaurants,
    /// Restaurant reservations
    RestaurantReservations,
    /// Theatres
    Theatres,
    /// Theatre bookings
    TheatreBookings,
    /// Attractions
    Attractions,
    /// ATMs
    Atms,
    /// Tourist profiles
    TouristProfiles,
    /// Companies
    Companies,
    /// Job listings
    JobListings,
    /// Industries
    Industries,
    /// Colleges
    Colleges,
    /// Universities
    Universities,
    /// Libraries
    Libraries,
    /// Coaching centers
    CoachingCenters,
    /// Businesses
    Businesses,
    /// Business centers
    BusinessCenters,
    /// Business news
    BusinessNews,
    /// Users (admin only)
    Users,
}

impl Collection {
    /// All collections
    pub const ALL: [Collection; 20] = [
        Self::Hotels,
        Self::HotelBookings,
        Self::Restaurants,
        Self::RestaurantReservations,
        Self::Theatres,
        Self::TheatreBookings,
        Self::Attractions,
        Self::Atms,
        Self::TouristProfiles,
        Self::Companies,
        Self::JobListings,
        Self::Industries,
        Self::Colleges,
        Self::Universities,
        Self::Libraries,
        Self::CoachingCenters,
        Self::Businesses,
        Self::BusinessCenters,
        Self::BusinessNews,
        Self::Users,
    ];

    /// Path segment under `/api/`
    #[must_use]
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Hotels => "hotels",
            Self::HotelBookings => "hotel-bookings",
            Self::Restaurants => "restaurants",
            Self::RestaurantReservations => "restaurant-reservations",
            Self::Theatres => "theatres",
            Self::TheatreBookings => "theatre-bookings",
            Self::Attractions => "attractions",
            Self::Atms => "atms",
            Self::TouristProfiles => "tourist-profiles",
            Self::Companies => "companies",
            Self::JobListings => "job-listings",
            Self::Industries => "industries",
            Self::Colleges => "colleges",
            Self::Universities => "universities",
            Self::Libraries => "libraries",
            Self::CoachingCenters => "coaching-centers",
            Self::Businesses => "businesses",
            Self::BusinessCenters => "business-centers",
            Self::BusinessNews => "business-news",
            Self::Users => "users",
        }
    }

    /// Collection endpoint
    #[must_use]
    pub fn path(&self) -> String {
        format!("/api/{}", self.slug())
    }

    /// Item endpoint
    #[must_use]
    pub fn item_path(&self, id: impl Display) -> String {
        format!("/api/{}/{}", self.slug(), id)
    }
}

/// Error returned when parsing an unknown collection name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collection: {0}")]
pub struct UnknownCollection(pub String);

impl FromStr for Collection {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim_start_matches("/api/").trim_matches('/');
        Self::ALL
            .into_iter()
            .find(|c| c.slug() == wanted)
            .ok_or_else(|| UnknownCollection(s.to_string()))
    }
}

/// A list response, in any of the shapes the backend produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    /// Bare JSON array
    Items(Vec<T>),
    /// Paged result
    Page {
        /// Items on this page
        content: Vec<T>,
        /// Total across all pages
        #[serde(rename = "totalElements", default)]
        total_elements: Option<u64>,
        /// Zero-based page index
        #[serde(default)]
        number: Option<u32>,
    },
    /// `{ data: [...] }` wrapper
    Wrapped {
        /// Items
        data: Vec<T>,
    },
}

impl<T> Listing<T> {
    /// Items, whatever the shape
    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Items(items) | Self::Page { content: items, .. } | Self::Wrapped { data: items } => {
                items
            }
        }
    }

    /// Number of items in this response
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Items(items) | Self::Page { content: items, .. } | Self::Wrapped { data: items } => {
                items.len()
            }
        }
    }

    /// Check if the response holds no items
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// CRUD client for one collection
#[derive(Debug)]
pub struct ResourceClient<'a, T> {
    client: &'a AuthenticatedHttpClient,
    collection: Collection,
    _item: PhantomData<fn() -> T>,
}

impl<'a, T> ResourceClient<'a, T>
where
    T: DeserializeOwned + Serialize,
{
    /// Bind a collection to a client
    #[inline]
    #[must_use]
    pub fn new(client: &'a AuthenticatedHttpClient, collection: Collection) -> Self {
        Self {
            client,
            collection,
            _item: PhantomData,
        }
    }

    /// Bound collection
    #[inline]
    #[must_use]
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// List all items
    pub async fn list(&self) -> Result<Vec<T>, ClientError> {
        let listing: Listing<T> = self.client.get_json(&self.collection.path()).await?;
        tracing::debug!("Fetched {} {}", listing.len(), self.collection.slug());
        Ok(listing.into_items())
    }

    /// Fetch one item
    pub async fn get(&self, id: impl Display) -> Result<T, ClientError> {
        self.client.get_json(&self.collection.item_path(id)).await
    }

    /// Create an item; returns the stored representation
    pub async fn create(&self, item: &T) -> Result<T, ClientError> {
        self.client.post_json(&self.collection.path(), item).await
    }

    /// Replace an item; returns the stored representation
    pub async fn update(&self, id: impl Display, item: &T) -> Result<T, ClientError> {
        self.client
            .put(&self.collection.item_path(id), item)
            .await?
            .json()
    }

    /// Delete an item
    pub async fn delete(&self, id: impl Display) -> Result<(), ClientError> {
        self.client.delete(&self.collection.item_path(id)).await?;
        Ok(())
    }
}

impl AuthenticatedHttpClient {
    /// CRUD client for a collection
    #[inline]
    #[must_use]
    pub fn resource<T>(&self, collection: Collection) -> ResourceClient<'_, T>
    where
        T: DeserializeOwned + Serialize,
    {
        ResourceClient::new(self, collection)
    }
}
