use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Buyer,
    Seller,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
        }
    }

    /// Buyer phrases are checked first, so "buy or sell" resolves to buyer.
    pub fn detect(message: &str) -> Option<Self> {
        let normalized = message.to_lowercase();
        if ["buyer", "buy", "purchase"].iter().any(|keyword| normalized.contains(keyword)) {
            return Some(Self::Buyer);
        }
        if ["seller", "sell"].iter().any(|keyword| normalized.contains(keyword)) {
            return Some(Self::Seller);
        }
        None
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    BuyerRegistration,
    SellerRegistration,
    MrvCompliance,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 3] = [
        WorkflowKind::BuyerRegistration,
        WorkflowKind::SellerRegistration,
        WorkflowKind::MrvCompliance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuyerRegistration => "buyer_registration",
            Self::SellerRegistration => "seller_registration",
            Self::MrvCompliance => "mrv_compliance",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::BuyerRegistration => "Buyer Registration",
            Self::SellerRegistration => "Seller Registration",
            Self::MrvCompliance => "MRV Compliance",
        }
    }

    pub fn registration_for(role: UserRole) -> Self {
        match role {
            UserRole::Buyer => Self::BuyerRegistration,
            UserRole::Seller => Self::SellerRegistration,
        }
    }

    /// Picks a workflow from a free-text reply to the workflow question.
    /// Registration requests resolve against the caller's role.
    pub fn detect(message: &str, role: UserRole) -> Option<Self> {
        let normalized = message.to_lowercase();
        if normalized.contains("regist") {
            return Some(Self::registration_for(role));
        }
        if normalized.contains("compliance") || normalized.contains("mrv") {
            return Some(Self::MrvCompliance);
        }
        None
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| DomainError::UnknownWorkflow(value.trim().to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowStep {
    #[serde(rename = "step")]
    pub number: u32,
    pub title: &'static str,
    pub description: &'static str,
    #[serde(rename = "documents")]
    pub required_documents: &'static [&'static str],
}
