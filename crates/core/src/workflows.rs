//! Fixed government-registration and compliance workflows.

use crate::domain::workflow::{WorkflowKind, WorkflowStep};

const BUYER_REGISTRATION: &[WorkflowStep] = &[
    WorkflowStep {
        number: 1,
        title: "Company Registration",
        description: "Register your company with BEE",
        required_documents: &["Company Registration Certificate", "PAN Card"],
    },
    WorkflowStep {
        number: 2,
        title: "GCI Registry Account",
        description: "Create an account on GCI registry",
        required_documents: &["Company Details", "Contact Information"],
    },
    WorkflowStep {
        number: 3,
        title: "Document Verification",
        description: "Upload and verify required documents",
        required_documents: &["GST Certificate", "Address Proof"],
    },
    WorkflowStep {
        number: 4,
        title: "Bank Details",
        description: "Link your bank account for transactions",
        required_documents: &["Cancelled Cheque", "Bank Statement"],
    },
    WorkflowStep {
        number: 5,
        title: "Final Approval",
        description: "Wait for admin approval to start trading",
        required_documents: &[],
    },
];

const SELLER_REGISTRATION: &[WorkflowStep] = &[
    WorkflowStep {
        number: 1,
        title: "Project Registration",
        description: "Register your carbon credit project with BEE",
        required_documents: &["Project Proposal", "Methodology Document"],
    },
    WorkflowStep {
        number: 2,
        title: "Methodology Selection",
        description: "Choose from 8 approved offset methodologies",
        required_documents: &["Methodology Selection Form"],
    },
    WorkflowStep {
        number: 3,
        title: "Verification Agency",
        description: "Select an accredited verification agency",
        required_documents: &["Agency Agreement"],
    },
    WorkflowStep {
        number: 4,
        title: "Document Submission",
        description: "Submit all required project documents",
        required_documents: &["MRV Plan", "Baseline Study", "Financial Documents"],
    },
    WorkflowStep {
        number: 5,
        title: "BEE Approval",
        description: "Wait for BEE project approval",
        required_documents: &[],
    },
];

const MRV_COMPLIANCE: &[WorkflowStep] = &[
    WorkflowStep {
        number: 1,
        title: "Monitoring Plan",
        description: "Prepare and submit monitoring plan",
        required_documents: &["Monitoring Plan Document"],
    },
    WorkflowStep {
        number: 2,
        title: "Data Collection",
        description: "Collect emissions data for reporting period",
        required_documents: &["Data Collection Forms", "Measurement Records"],
    },
    WorkflowStep {
        number: 3,
        title: "Report Preparation",
        description: "Prepare GHG emissions report",
        required_documents: &["Emissions Report", "Supporting Data"],
    },
    WorkflowStep {
        number: 4,
        title: "Third-Party Verification",
        description: "Get report verified by accredited agency",
        required_documents: &["Verification Report"],
    },
    WorkflowStep {
        number: 5,
        title: "BEE Submission",
        description: "Submit verified report to BEE",
        required_documents: &["Final Report", "Verification Certificate"],
    },
    WorkflowStep {
        number: 6,
        title: "Credit Surrender",
        description: "Surrender required credits for compliance",
        required_documents: &[],
    },
];

pub fn steps_for(kind: WorkflowKind) -> &'static [WorkflowStep] {
    match kind {
        WorkflowKind::BuyerRegistration => BUYER_REGISTRATION,
        WorkflowKind::SellerRegistration => SELLER_REGISTRATION,
        WorkflowKind::MrvCompliance => MRV_COMPLIANCE,
    }
}

pub fn step_count(kind: WorkflowKind) -> u32 {
    steps_for(kind).len() as u32
}

/// 1-based lookup.
pub fn step(kind: WorkflowKind, number: u32) -> Option<&'static WorkflowStep> {
    let index = usize::try_from(number).ok()?.checked_sub(1)?;
    steps_for(kind).get(index)
}

#[cfg(test)]
mod tests {
    use super::{step, step_count, steps_for};
    use crate::domain::workflow::WorkflowKind;

    #[test]
    fn steps_are_numbered_contiguously_from_one() {
        for kind in WorkflowKind::ALL {
            for (index, entry) in steps_for(kind).iter().enumerate() {
                assert_eq!(entry.number as usize, index + 1, "{kind}");
            }
        }
    }

    #[test]
    fn step_counts_match_the_published_procedures() {
        assert_eq!(step_count(WorkflowKind::BuyerRegistration), 5);
        assert_eq!(step_count(WorkflowKind::SellerRegistration), 5);
        assert_eq!(step_count(WorkflowKind::MrvCompliance), 6);
    }

    #[test]
    fn final_steps_need_no_documents() {
        for kind in WorkflowKind::ALL {
            let last = step(kind, step_count(kind)).expect("last step");
            assert!(last.required_documents.is_empty(), "{kind}");
        }
    }

    #[test]
    fn out_of_range_lookups_return_none() {
        assert!(step(WorkflowKind::MrvCompliance, 0).is_none());
        assert!(step(WorkflowKind::MrvCompliance, 7).is_none());
        assert_eq!(
            step(WorkflowKind::SellerRegistration, 2).map(|entry| entry.title),
            Some("Methodology Selection")
        );
    }
}
